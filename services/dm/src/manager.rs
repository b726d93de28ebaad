//! Composition root of the deployment manager
//!
//! ```text
//!   bootstrap() ──register──> FactoryRegistry
//!                                   │
//!   DeploymentManager ──> DmClient (ReconfigurableClient)
//!        │                    │
//!        │                    └──> MessageProcessor ──> DmMessageHandler
//!        │
//!        └──> Scheduler ──> CheckerMessagesTask, CheckerHeartbeatsTask
//! ```
//!
//! Backends are registered explicitly by [`bootstrap`]; nothing is
//! discovered at runtime.

use crate::application::{ApplicationRegistry, ManagedApplication, RootInstance};
use crate::checker_heartbeats::CheckerHeartbeatsTask;
use crate::checker_messages::CheckerMessagesTask;
use crate::config::DmConfig;
use crate::error::{DmError, Result};
use crate::handler::DmMessageHandler;
use crate::readiness::{InstanceReadiness, StartedInstanceReadiness};
use crate::scheduler::Scheduler;
use messaging::backends::{InMemoryBroker, InMemoryFactory};
use messaging::{
    BackendConfiguration, DmClient, FactoryRegistry, InstanceStatus, Message, MessageProcessor,
    MessagingError, MetricsSnapshot, ProcessorHandle,
};
use std::sync::Arc;
use tokio::time::Instant;

/// Register the built-in messaging backends
pub async fn bootstrap(registry: &FactoryRegistry, broker: Arc<InMemoryBroker>) {
    registry.register(Arc::new(InMemoryFactory::new(broker))).await;
}

struct Running {
    processor: ProcessorHandle,
    scheduler: Scheduler,
}

pub struct DeploymentManager {
    config: DmConfig,
    client: DmClient,
    applications: Arc<ApplicationRegistry>,
    readiness: Arc<dyn InstanceReadiness>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl DeploymentManager {
    pub fn new(config: DmConfig, registry: Arc<FactoryRegistry>) -> Self {
        let client = DmClient::new(registry, &config.domain);
        Self {
            config,
            client,
            applications: Arc::new(ApplicationRegistry::new()),
            readiness: Arc::new(StartedInstanceReadiness),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace how agent readiness is decided
    pub fn with_readiness(mut self, readiness: Arc<dyn InstanceReadiness>) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn config(&self) -> &DmConfig {
        &self.config
    }

    pub fn client(&self) -> &DmClient {
        &self.client
    }

    pub fn applications(&self) -> &Arc<ApplicationRegistry> {
        &self.applications
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.client.client().metrics().snapshot()
    }

    pub fn messages_checker(&self) -> CheckerMessagesTask {
        CheckerMessagesTask::new(
            self.applications.clone(),
            self.client.clone(),
            self.readiness.clone(),
        )
    }

    pub fn heartbeats_checker(&self) -> CheckerHeartbeatsTask {
        CheckerHeartbeatsTask::new(self.applications.clone(), self.config.heartbeat_staleness())
    }

    /// Connect to the configured backend and start the background tasks
    ///
    /// A configured backend that is not registered yet is not fatal: the
    /// DM connects as soon as it shows up.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        self.config.validate()?;

        match self
            .client
            .switch_backend(self.config.messaging_configuration())
            .await
        {
            Ok(()) => {}
            Err(MessagingError::UnknownBackend(backend)) => {
                tracing::warn!("Starting without messaging, backend '{}' is missing", backend)
            }
            Err(e) => return Err(e.into()),
        }

        for application in self.applications.list() {
            self.client.listen_to_agents(application.name()).await?;
        }

        let handler = Arc::new(DmMessageHandler::new(self.applications.clone()));
        let processor = MessageProcessor::new("dm", self.client.client().clone(), handler)
            .with_poll_interval(self.config.poll_interval())
            .start();

        let mut scheduler = Scheduler::new();
        scheduler.schedule(Arc::new(self.messages_checker()), self.config.messages_period());
        scheduler.schedule(
            Arc::new(self.heartbeats_checker()),
            self.config.heartbeats_period(),
        );

        *running = Some(Running {
            processor,
            scheduler,
        });
        tracing::info!(
            "Deployment manager started for domain '{}'",
            self.config.domain
        );
        Ok(())
    }

    /// Stop the timers, then the processor (which closes the connection)
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.scheduler.stop().await;
        running.processor.stop().await;
        tracing::info!("Deployment manager stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Apply a new messaging configuration
    pub async fn switch_backend(&self, configuration: BackendConfiguration) -> Result<()> {
        self.client.switch_backend(configuration).await?;
        Ok(())
    }

    /// Start managing an application and listening to its agents
    pub async fn add_application(&self, name: &str) -> Result<Arc<ManagedApplication>> {
        let application = self
            .applications
            .add(name)
            .ok_or_else(|| DmError::ApplicationExists(name.to_string()))?;

        if let Err(e) = self.client.listen_to_agents(name).await {
            self.applications.remove(name);
            return Err(e.into());
        }
        tracing::info!("Managing application '{}'", name);
        Ok(application)
    }

    /// Stop managing an application and drop its messaging artifacts
    ///
    /// Pending commands and heartbeat records go with it.
    pub async fn remove_application(&self, name: &str) -> Result<()> {
        let application = self
            .applications
            .remove(name)
            .ok_or_else(|| DmError::UnknownApplication(name.to_string()))?;

        // A flush in progress finishes before the messages are dropped
        let _delivery = application.lock_delivery().await;
        let dropped = application.awaiting().len();
        self.client.delete_application_artifacts(name).await?;
        tracing::info!(
            "Application '{}' removed ({} awaiting message(s) dropped)",
            name,
            dropped
        );
        Ok(())
    }

    fn application(&self, name: &str) -> Result<Arc<ManagedApplication>> {
        self.applications
            .get(name)
            .ok_or_else(|| DmError::UnknownApplication(name.to_string()))
    }

    pub fn add_root_instance(&self, application: &str, instance: RootInstance) -> Result<()> {
        let app = self.application(application)?;
        let path = instance.path.clone();
        if !app.add_root_instance(instance) {
            return Err(DmError::Configuration(format!(
                "root instance '{}' already exists in '{}'",
                path, application
            )));
        }
        Ok(())
    }

    /// Mark a root instance as deploying
    ///
    /// The heartbeat record starts now, and the instance model is queued
    /// for the agent: it is delivered once the machine reports up.
    pub async fn deploy_root_instance(&self, application: &str, root: &str) -> Result<()> {
        let app = self.application(application)?;
        let instance = app
            .root_instance(root)
            .ok_or_else(|| DmError::unknown_instance(application, root))?;

        app.set_status(root, InstanceStatus::Deploying);
        app.heartbeats().create(root, Instant::now());
        app.awaiting().store(
            root,
            Message::SetScopedInstance {
                root_instance_path: instance.path,
                component: instance.component,
                exported_variables: Default::default(),
            },
        );
        tracing::info!("Deploying {} in '{}'", root, application);
        Ok(())
    }

    /// Forget everything pending for a root instance and mark it not
    /// deployed
    ///
    /// Returns the number of awaiting messages dropped.
    pub async fn undeploy_root_instance(&self, application: &str, root: &str) -> Result<usize> {
        let app = self.application(application)?;
        let _delivery = app.lock_delivery().await;
        if app.set_status(root, InstanceStatus::NotDeployed).is_none() {
            return Err(DmError::unknown_instance(application, root));
        }

        let dropped = app.awaiting().purge(root);
        app.heartbeats().remove(root);
        tracing::info!(
            "Undeployed {} in '{}' ({} awaiting message(s) dropped)",
            root,
            application,
            dropped
        );
        Ok(dropped)
    }

    /// Send a command now if the agent is ready, otherwise keep it for the
    /// messages checker
    ///
    /// A failed immediate send is kept as well, so the command is delivered
    /// at least once. A flush in progress for the application completes
    /// first.
    pub async fn send(&self, application: &str, root: &str, message: Message) -> Result<()> {
        let app = self.application(application)?;
        if app.root_instance(root).is_none() {
            return Err(DmError::unknown_instance(application, root));
        }

        let _delivery = app.lock_delivery().await;
        // Keep the order of anything already waiting
        let direct = self.client.client().is_connected()
            && !app.awaiting().contains(root)
            && self.readiness.is_ready(&app, root).await;

        if direct {
            match self.client.send_to_agent(application, root, &message).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!(
                    "Failed to send '{}' to {} in '{}', keeping it: {}",
                    message.kind(),
                    root,
                    application,
                    e
                ),
            }
        }

        app.awaiting().store(root, message);
        Ok(())
    }
}
