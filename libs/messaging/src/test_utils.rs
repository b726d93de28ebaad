//! Test doubles for code built on top of the messaging layer
//!
//! [`RecordingFactory`] builds [`RecordingClient`]s that keep every publish
//! in memory and can be told to fail, which is what the delivery and switch
//! tests need. Available to other crates with the `test-utils` feature.

use crate::factory::{BackendConfiguration, MESSAGING_TYPE_PROPERTY};
use crate::{
    ClientFactory, ClientIdentity, InboundQueue, Message, MessagingClient, MessagingContext,
    TransportError,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// Configuration map selecting `type_name` and nothing else
pub fn backend_configuration(type_name: &str) -> BackendConfiguration {
    BackendConfiguration::from([(MESSAGING_TYPE_PROPERTY.to_string(), type_name.to_string())])
}

#[derive(Debug)]
pub struct RecordingClient {
    type_name: String,
    identity: RwLock<ClientIdentity>,
    queue: Arc<InboundQueue>,
    connected: AtomicBool,
    published: Mutex<Vec<(MessagingContext, Message)>>,
    subscriptions: Mutex<HashSet<MessagingContext>>,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    fail_close: AtomicBool,
    closes: AtomicUsize,
    hold: Mutex<Option<Arc<Semaphore>>>,
    held: Mutex<Option<Arc<Semaphore>>>,
    parked: Notify,
}

impl RecordingClient {
    pub fn new(type_name: &str, identity: ClientIdentity, queue: Arc<InboundQueue>) -> Self {
        Self {
            type_name: type_name.to_string(),
            identity: RwLock::new(identity),
            queue,
            connected: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashSet::new()),
            fail_all: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            fail_after: Mutex::new(None),
            fail_close: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
            hold: Mutex::new(None),
            held: Mutex::new(None),
            parked: Notify::new(),
        }
    }

    /// Every publish fails until turned off again
    pub fn fail_all_sends(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// The next `count` publishes fail
    pub fn fail_next_sends(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// The next `successes` publishes succeed, every later one fails
    pub fn fail_sends_after(&self, successes: usize) {
        *self.fail_after.lock() = Some(successes);
    }

    /// Turn every send failure mode off
    pub fn reset_failures(&self) {
        self.fail_all.store(false, Ordering::SeqCst);
        self.fail_next.store(0, Ordering::SeqCst);
        *self.fail_after.lock() = None;
    }

    /// The next publish waits for [`release_held_send`](Self::release_held_send)
    /// before it goes through (or fails)
    pub fn hold_next_send(&self) {
        let gate = Arc::new(Semaphore::new(0));
        *self.held.lock() = Some(gate.clone());
        *self.hold.lock() = Some(gate);
    }

    /// Wait until a publish is parked by [`hold_next_send`](Self::hold_next_send)
    pub async fn wait_for_held_send(&self) {
        self.parked.notified().await;
    }

    pub fn release_held_send(&self) {
        if let Some(gate) = self.held.lock().take() {
            gate.add_permits(1);
        }
    }

    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Successful publishes, oldest first
    pub fn published(&self) -> Vec<(MessagingContext, Message)> {
        self.published.lock().clone()
    }

    /// Messages successfully published to `ctx`, oldest first
    pub fn published_to(&self, ctx: &MessagingContext) -> Vec<Message> {
        self.published
            .lock()
            .iter()
            .filter(|(target, _)| target == ctx)
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> HashSet<MessagingContext> {
        self.subscriptions.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate inbound traffic
    pub fn deliver(&self, message: Message) {
        self.queue.push(message);
    }

    fn should_fail(&self) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(remaining) = self.fail_after.lock().as_mut() {
            if *remaining == 0 {
                return true;
            }
            *remaining -= 1;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessagingClient for RecordingClient {
    fn backend_type(&self) -> &str {
        &self.type_name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn open_connection(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.lock().clear();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::close_failed("close refused"));
        }
        Ok(())
    }

    async fn publish(
        &self,
        ctx: &MessagingContext,
        message: &Message,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Ok(());
        }
        let gate = self.hold.lock().take();
        if let Some(gate) = gate {
            self.parked.notify_one();
            let _ = gate.acquire().await;
        }
        if self.should_fail() {
            return Err(TransportError::publish_failed(
                "simulated send failure",
                message.kind(),
                ctx,
            ));
        }
        self.published.lock().push((ctx.clone(), message.clone()));
        Ok(())
    }

    async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), TransportError> {
        if self.is_connected() {
            self.subscriptions.lock().insert(ctx.clone());
        }
        Ok(())
    }

    async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), TransportError> {
        self.subscriptions.lock().remove(ctx);
        Ok(())
    }

    async fn delete_server_artifacts(&self, application: &str) -> Result<(), TransportError> {
        self.subscriptions
            .lock()
            .retain(|ctx| ctx.application != application);
        Ok(())
    }

    fn identity(&self) -> ClientIdentity {
        self.identity.read().clone()
    }

    async fn set_identity(&self, identity: ClientIdentity) -> Result<(), TransportError> {
        *self.identity.write() = identity;
        Ok(())
    }
}

/// Factory keeping a handle on every client it builds
#[derive(Debug)]
pub struct RecordingFactory {
    type_name: String,
    clients: Mutex<Vec<Arc<RecordingClient>>>,
}

impl RecordingFactory {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Most recently built client
    pub fn last_client(&self) -> Option<Arc<RecordingClient>> {
        self.clients.lock().last().cloned()
    }

    pub fn clients(&self) -> Vec<Arc<RecordingClient>> {
        self.clients.lock().clone()
    }
}

impl ClientFactory for RecordingFactory {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn apply_configuration(&self, configuration: &BackendConfiguration) -> bool {
        configuration
            .get(MESSAGING_TYPE_PROPERTY)
            .map_or(true, |t| t == &self.type_name)
    }

    fn create_client(
        &self,
        identity: ClientIdentity,
        queue: Arc<InboundQueue>,
    ) -> Arc<dyn MessagingClient> {
        let client = Arc::new(RecordingClient::new(&self.type_name, identity, queue));
        self.clients.lock().push(client.clone());
        client
    }
}
