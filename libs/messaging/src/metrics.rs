//! Read-only counters for the observability collaborator
//!
//! Counters are updated by the reconfigurable client (sends) and by the
//! message processor (receives). Formatting and export are left to the
//! caller: [`MessagingMetrics::snapshot`] returns plain values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the epoch, 0 if the clock is before it
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_millis(millis: u64) -> Option<SystemTime> {
    (millis > 0).then(|| UNIX_EPOCH + Duration::from_millis(millis))
}

#[derive(Debug, Default)]
pub struct MessagingMetrics {
    /// Messages published successfully
    pub messages_sent: AtomicU64,
    /// Publish attempts that failed
    pub send_failures: AtomicU64,
    /// Messages taken from the inbound queue
    pub messages_received: AtomicU64,
    /// Received messages the handler failed on
    pub receive_failures: AtomicU64,
    last_sent_ms: AtomicU64,
    last_send_failure_ms: AtomicU64,
}

impl MessagingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.last_sent_ms.store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
        self.last_send_failure_ms
            .store(now_millis(), Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_failure(&self) {
        self.receive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_sent(&self) -> Option<SystemTime> {
        from_millis(self.last_sent_ms.load(Ordering::Relaxed))
    }

    pub fn last_send_failure(&self) -> Option<SystemTime> {
        from_millis(self.last_send_failure_ms.load(Ordering::Relaxed))
    }

    /// Get message success rate
    pub fn send_success_rate(&self) -> f64 {
        let sent = self.messages_sent.load(Ordering::Relaxed);
        let failed = self.send_failures.load(Ordering::Relaxed);
        let total = sent + failed;
        if total == 0 {
            return 1.0;
        }
        sent as f64 / total as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            last_sent: self.last_sent(),
            last_send_failure: self.last_send_failure(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MessagingMetrics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub send_failures: u64,
    pub last_sent: Option<SystemTime>,
    pub last_send_failure: Option<SystemTime>,
    pub messages_received: u64,
    pub receive_failures: u64,
}
