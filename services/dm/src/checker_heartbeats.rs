//! Detection of deployed root instances that stopped sending heartbeats
//!
//! A silent instance is marked suspected down and its status becomes
//! `Problem`. What to do about it (re-provisioning, alerting) is up to the
//! deployment logic reading that state.

use crate::application::ApplicationRegistry;
use crate::scheduler::PeriodicTask;
use async_trait::async_trait;
use messaging::InstanceStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Statuses in which an agent is expected to send heartbeats
const MONITORED: [InstanceStatus; 2] = [
    InstanceStatus::DeployedStarted,
    InstanceStatus::DeployedStopped,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspectedInstance {
    pub application: String,
    pub root_instance: String,
}

pub struct CheckerHeartbeatsTask {
    applications: Arc<ApplicationRegistry>,
    staleness: Duration,
}

impl CheckerHeartbeatsTask {
    pub fn new(applications: Arc<ApplicationRegistry>, staleness: Duration) -> Self {
        Self {
            applications,
            staleness,
        }
    }

    pub fn run_once(&self) -> Vec<SuspectedInstance> {
        self.check_at(Instant::now())
    }

    /// Check every monitored root instance against `now`
    pub fn check_at(&self, now: Instant) -> Vec<SuspectedInstance> {
        let mut suspected = Vec::new();

        for application in self.applications.list() {
            let roots = application.root_instances_in(&MONITORED);
            let stale = application.heartbeats().check(
                roots.iter().map(String::as_str),
                now,
                self.staleness,
            );

            for root in stale {
                if let Some(previous) = application.set_status(&root, InstanceStatus::Problem) {
                    tracing::warn!(
                        "No heartbeat from {} in '{}' for more than {:?}, {} -> {}",
                        root,
                        application.name(),
                        self.staleness,
                        previous,
                        InstanceStatus::Problem
                    );
                }
                suspected.push(SuspectedInstance {
                    application: application.name().to_string(),
                    root_instance: root,
                });
            }
        }
        suspected
    }
}

#[async_trait]
impl PeriodicTask for CheckerHeartbeatsTask {
    fn name(&self) -> &'static str {
        "checker-heartbeats"
    }

    async fn tick(&self) {
        let suspected = self.run_once();
        if !suspected.is_empty() {
            tracing::debug!("{} instance(s) suspected down", suspected.len());
        }
    }
}
