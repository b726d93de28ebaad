//! Periodic timers for the checker tasks
//!
//! Every scheduled task gets its own tokio task and interval. A tick that
//! panics is logged and the timer keeps going.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Work run on a fixed period
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn tick(&self);
}

pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Run `task` every `period`, first after one full period
    pub fn schedule(&mut self, task: Arc<dyn PeriodicTask>, period: Duration) {
        let name = task.name();
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if AssertUnwindSafe(task.tick()).catch_unwind().await.is_err() {
                            tracing::error!("Periodic task '{}' panicked", name);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("Periodic task '{}' stopped", name);
        });

        tracing::info!("Scheduled '{}' every {:?}", name, period);
        self.tasks.push((name, handle));
    }

    /// Stop every timer; a tick in progress completes first
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::error!("Periodic task '{}' ended abnormally: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn tick(&self) {
            if self.ticks.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_every_period_and_survives_panics() {
        let counter = Arc::new(Counter::default());
        let mut scheduler = Scheduler::new();
        scheduler.schedule(counter.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.stop().await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.ticks.load(Ordering::SeqCst), 3);
    }
}
