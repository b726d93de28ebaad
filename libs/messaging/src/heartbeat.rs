//! Periodic liveness notifications sent by an agent to the DM

use crate::{AgentClient, Message};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

pub struct HeartbeatEmitter {
    agent: AgentClient,
    period: Duration,
    ip_address: Option<String>,
}

impl HeartbeatEmitter {
    pub fn new(agent: AgentClient) -> Self {
        Self {
            agent,
            period: DEFAULT_HEARTBEAT_PERIOD,
            ip_address: None,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Build the heartbeat for the instance the agent currently acts for
    fn heartbeat(&self) -> Option<Message> {
        let identity = self.agent.identity();
        Some(Message::Heartbeat {
            application: identity.application?,
            root_instance_path: identity.scoped_instance_path?,
            ip_address: self.ip_address.clone(),
        })
    }

    /// Send one heartbeat now
    pub async fn beat(&self) {
        let Some(heartbeat) = self.heartbeat() else {
            tracing::debug!("Agent has no scoped instance, heartbeat skipped");
            return;
        };
        if let Err(e) = self.agent.send_to_dm(&heartbeat).await {
            tracing::warn!("Failed to send heartbeat: {}", e);
        }
    }

    pub fn start(self) -> HeartbeatHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.beat().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!("Heartbeat emitter stopped");
        });

        HeartbeatHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Heartbeat emitter ended abnormally: {}", e);
        }
    }
}
