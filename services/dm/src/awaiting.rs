//! Deferred-delivery store
//!
//! Commands for a root instance whose agent is not ready yet wait here, in
//! issuance order, until the messages checker flushes them. An instance with
//! nothing pending has no entry at all.
//!
//! A flush takes the whole list out, sends it with the lock released, and
//! either drops it (every send succeeded) or puts it back in front of
//! whatever was stored in the meantime.

use messaging::Message;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct AwaitingMessages {
    entries: Mutex<HashMap<String, Vec<Message>>>,
}

impl AwaitingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the list of `root_instance`
    pub fn store(&self, root_instance: &str, message: Message) {
        self.entries
            .lock()
            .entry(root_instance.to_string())
            .or_default()
            .push(message);
    }

    /// Remove and return the whole list of `root_instance`
    pub fn take(&self, root_instance: &str) -> Option<Vec<Message>> {
        self.entries.lock().remove(root_instance)
    }

    /// Put a list taken by [`take`](Self::take) back in front
    ///
    /// Messages stored since the list was taken stay after it.
    pub fn restore(&self, root_instance: &str, mut messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let mut entries = self.entries.lock();
        let entry = entries.entry(root_instance.to_string()).or_default();
        messages.append(entry);
        *entry = messages;
    }

    /// Drop everything pending for `root_instance`
    pub fn purge(&self, root_instance: &str) -> usize {
        self.take(root_instance).map_or(0, |m| m.len())
    }

    /// Copy of the list of `root_instance`, oldest first
    pub fn messages(&self, root_instance: &str) -> Vec<Message> {
        self.entries
            .lock()
            .get(root_instance)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, root_instance: &str) -> bool {
        self.entries.lock().contains_key(root_instance)
    }

    /// Root instances with pending messages, sorted
    pub fn root_instances(&self) -> Vec<String> {
        let mut roots: Vec<String> = self.entries.lock().keys().cloned().collect();
        roots.sort();
        roots
    }

    /// Total number of pending messages
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
