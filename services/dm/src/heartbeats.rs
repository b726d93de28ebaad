//! Liveness records of deployed root instances

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    SuspectedDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub last_heartbeat: Instant,
    pub liveness: Liveness,
}

impl HeartbeatRecord {
    fn is_stale(&self, now: Instant, staleness: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > staleness
    }
}

/// Heartbeat record per root instance of one application
///
/// A record exists from deployment to undeployment. Deployment counts as a
/// first heartbeat, so a fresh instance gets a full staleness window.
#[derive(Debug, Default)]
pub struct HeartbeatRecords {
    records: Mutex<HashMap<String, HeartbeatRecord>>,
}

impl HeartbeatRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) the record of a root instance
    pub fn create(&self, root_instance: &str, now: Instant) {
        self.records.lock().insert(
            root_instance.to_string(),
            HeartbeatRecord {
                last_heartbeat: now,
                liveness: Liveness::Alive,
            },
        );
    }

    pub fn remove(&self, root_instance: &str) -> bool {
        self.records.lock().remove(root_instance).is_some()
    }

    /// Record a heartbeat
    ///
    /// Returns the previous liveness, or `None` if the instance has no
    /// record (not deployed through this DM).
    pub fn record_heartbeat(&self, root_instance: &str, now: Instant) -> Option<Liveness> {
        let mut records = self.records.lock();
        let record = records.get_mut(root_instance)?;
        let previous = record.liveness;
        record.last_heartbeat = now;
        record.liveness = Liveness::Alive;
        Some(previous)
    }

    /// Mark as suspected down every listed instance silent for longer than
    /// `staleness`
    ///
    /// Returns the instances that changed from alive to suspected down.
    pub fn check<'a>(
        &self,
        root_instances: impl IntoIterator<Item = &'a str>,
        now: Instant,
        staleness: Duration,
    ) -> Vec<String> {
        let mut records = self.records.lock();
        let mut suspected = Vec::new();
        for root in root_instances {
            let Some(record) = records.get_mut(root) else {
                continue;
            };
            if record.liveness == Liveness::Alive && record.is_stale(now, staleness) {
                record.liveness = Liveness::SuspectedDown;
                suspected.push(root.to_string());
            }
        }
        suspected
    }

    pub fn get(&self, root_instance: &str) -> Option<HeartbeatRecord> {
        self.records.lock().get(root_instance).copied()
    }

    pub fn liveness(&self, root_instance: &str) -> Option<Liveness> {
        self.get(root_instance).map(|r| r.liveness)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALENESS: Duration = Duration::from_secs(10);

    #[test]
    fn test_fresh_record_is_alive() {
        let records = HeartbeatRecords::new();
        let t0 = Instant::now();
        records.create("/vm", t0);

        assert!(records
            .check(["/vm"], t0 + Duration::from_secs(10), STALENESS)
            .is_empty());
        assert_eq!(records.liveness("/vm"), Some(Liveness::Alive));
    }

    #[test]
    fn test_silence_marks_suspected_down_once() {
        let records = HeartbeatRecords::new();
        let t0 = Instant::now();
        records.create("/vm", t0);

        let later = t0 + Duration::from_secs(11);
        assert_eq!(records.check(["/vm"], later, STALENESS), vec!["/vm"]);
        assert_eq!(records.liveness("/vm"), Some(Liveness::SuspectedDown));
        assert!(records.check(["/vm"], later, STALENESS).is_empty());
    }

    #[test]
    fn test_heartbeat_revives() {
        let records = HeartbeatRecords::new();
        let t0 = Instant::now();
        records.create("/vm", t0);
        records.check(["/vm"], t0 + Duration::from_secs(20), STALENESS);

        let previous = records.record_heartbeat("/vm", t0 + Duration::from_secs(21));
        assert_eq!(previous, Some(Liveness::SuspectedDown));
        assert_eq!(records.liveness("/vm"), Some(Liveness::Alive));
    }

    #[test]
    fn test_unknown_instances_are_ignored() {
        let records = HeartbeatRecords::new();
        let now = Instant::now();
        assert_eq!(records.record_heartbeat("/vm", now), None);
        assert!(records.check(["/vm"], now, STALENESS).is_empty());
        assert!(!records.remove("/vm"));
        assert!(records.is_empty());
    }
}
