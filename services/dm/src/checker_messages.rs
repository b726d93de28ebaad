//! Flush of deferred commands to agents that became ready
//!
//! Each tick walks every application and every root instance with pending
//! messages. A ready instance gets its list sent in order; the first failed
//! send puts the whole list back for the next tick. Failures never stop the
//! walk: other instances and applications are still processed.
//!
//! A flush holds the delivery lock of its application, so a direct send or
//! an undeploy waits for it instead of slipping in while the list is out of
//! the store.

use crate::application::{ApplicationRegistry, ManagedApplication};
use crate::readiness::InstanceReadiness;
use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use messaging::DmClient;
use std::sync::Arc;

/// Outcome of one tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Instances whose whole list was delivered and removed
    pub flushed_instances: usize,
    /// Instances whose list was put back after a failed send
    pub failed_instances: usize,
    /// Instances skipped because their agent is not ready
    pub deferred_instances: usize,
    /// Successful sends, including those of failed flushes
    pub messages_sent: usize,
}

impl FlushReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct CheckerMessagesTask {
    applications: Arc<ApplicationRegistry>,
    client: DmClient,
    readiness: Arc<dyn InstanceReadiness>,
}

impl CheckerMessagesTask {
    pub fn new(
        applications: Arc<ApplicationRegistry>,
        client: DmClient,
        readiness: Arc<dyn InstanceReadiness>,
    ) -> Self {
        Self {
            applications,
            client,
            readiness,
        }
    }

    pub async fn run_once(&self) -> FlushReport {
        let mut report = FlushReport::default();

        // Publishing while disconnected is a silent no-op; flushing now
        // would drop the messages.
        if !self.client.client().is_connected() {
            tracing::debug!("No messaging connection, awaiting messages kept");
            return report;
        }

        for application in self.applications.list() {
            for root in application.awaiting().root_instances() {
                if self.readiness.is_ready(&application, &root).await {
                    self.flush(&application, &root, &mut report).await;
                } else {
                    report.deferred_instances += 1;
                }
            }
        }
        report
    }

    async fn flush(
        &self,
        application: &ManagedApplication,
        root: &str,
        report: &mut FlushReport,
    ) {
        let _delivery = application.lock_delivery().await;
        let Some(messages) = application.awaiting().take(root) else {
            return;
        };

        let mut failure = None;
        for message in &messages {
            match self
                .client
                .send_to_agent(application.name(), root, message)
                .await
            {
                Ok(()) => report.messages_sent += 1,
                Err(e) => {
                    failure = Some((message.kind(), e));
                    break;
                }
            }
        }

        match failure {
            None => {
                tracing::debug!(
                    "Sent {} awaiting message(s) to {} in '{}'",
                    messages.len(),
                    root,
                    application.name()
                );
                report.flushed_instances += 1;
            }
            Some((kind, e)) => {
                tracing::warn!(
                    "Failed to send '{}' to {} in '{}', {} message(s) kept: {}",
                    kind,
                    root,
                    application.name(),
                    messages.len(),
                    e
                );
                application.awaiting().restore(root, messages);
                report.failed_instances += 1;
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for CheckerMessagesTask {
    fn name(&self) -> &'static str {
        "checker-messages"
    }

    async fn tick(&self) {
        let report = self.run_once().await;
        if !report.is_empty() {
            tracing::debug!("Awaiting messages check: {:?}", report);
        }
    }
}
