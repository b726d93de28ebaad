//! Deployment manager binary
//!
//! Usage:
//!   dm --config config/dm.toml
//!   DM__MESSAGING__TYPE=in-memory dm --log-level debug

use anyhow::Result;
use clap::Parser;
use dm::{bootstrap, DeploymentManager, DmConfig};
use messaging::backends::InMemoryBroker;
use messaging::FactoryRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dm")]
#[command(about = "Deployment manager")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = DmConfig::load(args.config.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {:#}", e);
        e
    })?;
    info!(
        "Loaded configuration for domain '{}' (messaging: {})",
        config.domain, config.messaging.backend_type
    );

    let registry = Arc::new(FactoryRegistry::new());
    bootstrap(&registry, Arc::new(InMemoryBroker::new())).await;

    let manager = DeploymentManager::new(config, registry);
    manager.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    manager.stop().await;
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    if args.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
