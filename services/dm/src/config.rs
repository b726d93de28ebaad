//! Deployment manager configuration
//!
//! Loaded from a TOML file (`config/dm.toml` by default) with environment
//! overrides: `DM__DOMAIN=prod`, `DM__MESSAGING__TYPE=in-memory`,
//! `DM__CHECKER__MESSAGES_PERIOD_MS=500`, ...
//!
//! Backend properties are written relative to the backend type:
//!
//! ```toml
//! [messaging]
//! type = "in-memory"
//!
//! [messaging.properties]
//! name = "local"        # becomes "in-memory.name"
//! ```

use crate::error::DmError;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use messaging::backends::IN_MEMORY_TYPE;
use messaging::{BackendConfiguration, MESSAGING_TYPE_PROPERTY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/dm.toml";
pub const ENV_PREFIX: &str = "DM";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DmConfig {
    /// Domain this DM manages applications in
    pub domain: String,
    pub messaging: MessagingSettings,
    pub checker: CheckerSettings,
    pub heartbeat: HeartbeatSettings,
    pub processor: ProcessorSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MessagingSettings {
    #[serde(rename = "type")]
    pub backend_type: String,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckerSettings {
    pub messages_period_ms: u64,
    pub heartbeats_period_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Silence after which a deployed root instance is suspected down
    pub staleness_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorSettings {
    pub poll_interval_ms: u64,
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            domain: "default".to_string(),
            messaging: MessagingSettings::default(),
            checker: CheckerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            processor: ProcessorSettings::default(),
        }
    }
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            backend_type: IN_MEMORY_TYPE.to_string(),
            properties: HashMap::new(),
        }
    }
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            messages_period_ms: 1000,
            heartbeats_period_ms: 5000,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            staleness_ms: 15_000,
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl DmConfig {
    /// Load from `path` (or the default file, if present) plus `DM__*`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: DmConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        tracing::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), DmError> {
        if self.domain.trim().is_empty() {
            return Err(DmError::Configuration("domain must not be empty".to_string()));
        }
        if self.messaging.backend_type.trim().is_empty() {
            return Err(DmError::Configuration(
                "messaging.type must not be empty".to_string(),
            ));
        }

        let periods = [
            ("checker.messages_period_ms", self.checker.messages_period_ms),
            ("checker.heartbeats_period_ms", self.checker.heartbeats_period_ms),
            ("heartbeat.staleness_ms", self.heartbeat.staleness_ms),
            ("processor.poll_interval_ms", self.processor.poll_interval_ms),
        ];
        for (key, value) in periods {
            if value == 0 {
                return Err(DmError::Configuration(format!("{} must be positive", key)));
            }
        }
        Ok(())
    }

    /// Flat map handed to the messaging layer when switching backend
    pub fn messaging_configuration(&self) -> BackendConfiguration {
        let backend = &self.messaging.backend_type;
        let mut configuration: BackendConfiguration = self
            .messaging
            .properties
            .iter()
            .map(|(key, value)| (format!("{}.{}", backend, key), value.clone()))
            .collect();
        configuration.insert(MESSAGING_TYPE_PROPERTY.to_string(), backend.clone());
        configuration
    }

    pub fn messages_period(&self) -> Duration {
        Duration::from_millis(self.checker.messages_period_ms)
    }

    pub fn heartbeats_period(&self) -> Duration {
        Duration::from_millis(self.checker.heartbeats_period_ms)
    }

    pub fn heartbeat_staleness(&self) -> Duration {
        Duration::from_millis(self.heartbeat.staleness_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.processor.poll_interval_ms)
    }
}
