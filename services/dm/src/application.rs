//! Managed applications and their root instances
//!
//! The DM only tracks root instances: one per agent/machine. Each
//! application carries its own deferred-delivery store and heartbeat
//! records, so work on one application never contends with another.
//!
//! Anything that sends to or drops the awaiting messages of an application
//! holds its delivery lock, so commands to one root instance never overtake
//! each other and a purge never races a flush.

use crate::awaiting::AwaitingMessages;
use crate::heartbeats::HeartbeatRecords;
use dashmap::DashMap;
use messaging::InstanceStatus;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInstance {
    /// Instance path, e.g. `/vm1`
    pub path: String,
    pub component: String,
    pub status: InstanceStatus,
    pub ip_address: Option<String>,
}

impl RootInstance {
    pub fn new(path: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            component: component.into(),
            status: InstanceStatus::NotDeployed,
            ip_address: None,
        }
    }
}

#[derive(Debug)]
pub struct ManagedApplication {
    name: String,
    instances: RwLock<BTreeMap<String, RootInstance>>,
    awaiting: AwaitingMessages,
    heartbeats: HeartbeatRecords,
    delivery: tokio::sync::Mutex<()>,
}

impl ManagedApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: RwLock::new(BTreeMap::new()),
            awaiting: AwaitingMessages::new(),
            heartbeats: HeartbeatRecords::new(),
            delivery: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn awaiting(&self) -> &AwaitingMessages {
        &self.awaiting
    }

    pub fn heartbeats(&self) -> &HeartbeatRecords {
        &self.heartbeats
    }

    /// Serialize sends and purges of awaiting messages
    ///
    /// Held across sends, so it is an async lock.
    pub async fn lock_delivery(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.delivery.lock().await
    }

    /// Add a root instance; returns `false` if the path is taken
    pub fn add_root_instance(&self, instance: RootInstance) -> bool {
        let mut instances = self.instances.write();
        if instances.contains_key(&instance.path) {
            return false;
        }
        instances.insert(instance.path.clone(), instance);
        true
    }

    pub fn root_instance(&self, path: &str) -> Option<RootInstance> {
        self.instances.read().get(path).cloned()
    }

    pub fn root_instances(&self) -> Vec<RootInstance> {
        self.instances.read().values().cloned().collect()
    }

    pub fn status(&self, path: &str) -> Option<InstanceStatus> {
        self.instances.read().get(path).map(|i| i.status)
    }

    /// Change the status of a root instance, returning the previous one
    pub fn set_status(&self, path: &str, status: InstanceStatus) -> Option<InstanceStatus> {
        let mut instances = self.instances.write();
        let instance = instances.get_mut(path)?;
        Some(std::mem::replace(&mut instance.status, status))
    }

    /// Change the status only if it currently is `expected`
    pub fn transition(
        &self,
        path: &str,
        expected: InstanceStatus,
        status: InstanceStatus,
    ) -> bool {
        let mut instances = self.instances.write();
        match instances.get_mut(path) {
            Some(instance) if instance.status == expected => {
                instance.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn set_ip_address(&self, path: &str, ip_address: impl Into<String>) -> bool {
        match self.instances.write().get_mut(path) {
            Some(instance) => {
                instance.ip_address = Some(ip_address.into());
                true
            }
            None => false,
        }
    }

    /// Paths of the root instances in one of `statuses`
    pub fn root_instances_in(&self, statuses: &[InstanceStatus]) -> Vec<String> {
        self.instances
            .read()
            .values()
            .filter(|i| statuses.contains(&i.status))
            .map(|i| i.path.clone())
            .collect()
    }
}

/// Applications managed by the DM, by name
#[derive(Debug, Default)]
pub struct ApplicationRegistry {
    applications: DashMap<String, Arc<ManagedApplication>>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start managing an application; `None` if the name is taken
    pub fn add(&self, name: &str) -> Option<Arc<ManagedApplication>> {
        use dashmap::mapref::entry::Entry;

        match self.applications.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let application = Arc::new(ManagedApplication::new(name));
                vacant.insert(application.clone());
                Some(application)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ManagedApplication>> {
        self.applications.get(name).map(|a| a.value().clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ManagedApplication>> {
        self.applications.remove(name).map(|(_, a)| a)
    }

    /// Snapshot of every application, sorted by name
    ///
    /// The map is not locked while callers work on the returned list.
    pub fn list(&self) -> Vec<Arc<ManagedApplication>> {
        let mut applications: Vec<Arc<ManagedApplication>> = self
            .applications
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        applications.sort_by(|a, b| a.name().cmp(b.name()));
        applications
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}
