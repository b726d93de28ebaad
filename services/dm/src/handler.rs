//! DM reaction to agent notifications
//!
//! Notifications about applications or root instances the DM does not
//! manage are logged and dropped; they never fail the processor.

use crate::application::{ApplicationRegistry, ManagedApplication};
use async_trait::async_trait;
use messaging::{InstanceStatus, Message, MessageHandler, MessagingError};
use std::sync::Arc;
use tokio::time::Instant;

pub struct DmMessageHandler {
    applications: Arc<ApplicationRegistry>,
}

impl DmMessageHandler {
    pub fn new(applications: Arc<ApplicationRegistry>) -> Self {
        Self { applications }
    }

    fn application(&self, name: &str, kind: &str) -> Option<Arc<ManagedApplication>> {
        let application = self.applications.get(name);
        if application.is_none() {
            tracing::warn!("Dropping '{}' from unknown application '{}'", kind, name);
        }
        application
    }

    fn on_heartbeat(&self, app: &ManagedApplication, root: &str, ip_address: Option<String>) {
        if app
            .heartbeats()
            .record_heartbeat(root, Instant::now())
            .is_none()
        {
            tracing::debug!("Heartbeat from undeployed {} in '{}'", root, app.name());
            return;
        }

        if let Some(ip) = ip_address {
            app.set_ip_address(root, ip);
        }
        if app.transition(root, InstanceStatus::Problem, InstanceStatus::DeployedStarted) {
            tracing::info!("{} in '{}' is alive again", root, app.name());
        }
    }

    fn on_machine_up(&self, app: &ManagedApplication, root: &str, ip_address: String) {
        let Some(previous) = app.set_status(root, InstanceStatus::DeployedStarted) else {
            tracing::warn!("Machine up for unknown {} in '{}'", root, app.name());
            return;
        };
        app.set_ip_address(root, ip_address);
        // The agent just started: its first heartbeat is implicit
        app.heartbeats().create(root, Instant::now());
        tracing::info!(
            "Machine {} in '{}' is up ({} -> {})",
            root,
            app.name(),
            previous,
            InstanceStatus::DeployedStarted
        );
    }

    fn on_machine_down(&self, app: &ManagedApplication, root: &str) {
        match app.set_status(root, InstanceStatus::NotDeployed) {
            Some(previous) => tracing::info!(
                "Machine {} in '{}' is down ({} -> {})",
                root,
                app.name(),
                previous,
                InstanceStatus::NotDeployed
            ),
            None => tracing::warn!("Machine down for unknown {} in '{}'", root, app.name()),
        }
    }

    fn on_instance_changed(&self, app: &ManagedApplication, path: &str, status: InstanceStatus) {
        match app.set_status(path, status) {
            Some(previous) if previous != status => {
                tracing::info!("{} in '{}': {} -> {}", path, app.name(), previous, status)
            }
            Some(_) => {}
            // Only root instances are tracked here
            None => tracing::debug!("{} in '{}' is now {}", path, app.name(), status),
        }
    }
}

#[async_trait]
impl MessageHandler for DmMessageHandler {
    async fn handle(&self, message: Message) -> Result<(), MessagingError> {
        let kind = message.kind();
        match message {
            Message::Heartbeat {
                application,
                root_instance_path,
                ip_address,
            } => {
                if let Some(app) = self.application(&application, kind) {
                    self.on_heartbeat(&app, &root_instance_path, ip_address);
                }
            }
            Message::MachineUp {
                application,
                root_instance_path,
                ip_address,
            } => {
                if let Some(app) = self.application(&application, kind) {
                    self.on_machine_up(&app, &root_instance_path, ip_address);
                }
            }
            Message::MachineDown {
                application,
                root_instance_path,
            } => {
                if let Some(app) = self.application(&application, kind) {
                    self.on_machine_down(&app, &root_instance_path);
                }
            }
            Message::InstanceChanged {
                application,
                instance_path,
                new_status,
            } => {
                if let Some(app) = self.application(&application, kind) {
                    self.on_instance_changed(&app, &instance_path, new_status);
                }
            }
            Message::InstanceRemoved {
                application,
                instance_path,
            } => {
                tracing::debug!("{} removed from '{}'", instance_path, application);
            }
            command => {
                tracing::warn!("Ignoring '{}': commands are not meant for the DM", command.kind());
            }
        }
        Ok(())
    }
}
