//! Unbounded FIFO of inbound messages for one owner
//!
//! Backends push into the queue from whatever task receives traffic; the
//! owning [`MessageProcessor`](crate::MessageProcessor) drains it. The queue
//! outlives backend switches: every client built for an owner is handed the
//! same `Arc<InboundQueue>`.

use crate::Message;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct InboundQueue {
    messages: Mutex<VecDeque<Message>>,
    available: Notify,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake one waiting consumer
    pub fn push(&self, message: Message) {
        self.messages.lock().push_back(message);
        self.available.notify_one();
    }

    /// Take the oldest message without waiting
    pub fn try_pop(&self) -> Option<Message> {
        self.messages.lock().pop_front()
    }

    /// Wait for the next message
    ///
    /// Cancel-safe: a message is only removed once it is returned.
    pub async fn pop(&self) -> Message {
        loop {
            let notified = self.available.notified();
            if let Some(message) = self.try_pop() {
                return message;
            }
            notified.await;
        }
    }

    /// Wait for the next message, giving up after `timeout`
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.pop()).await.ok()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Diagnostic only; another task may push right after this returns
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Remove and return every queued message, oldest first
    pub fn drain(&self) -> Vec<Message> {
        self.messages.lock().drain(..).collect()
    }
}
