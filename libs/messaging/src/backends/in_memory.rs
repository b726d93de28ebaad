//! In-process messaging backend
//!
//! All clients built by one [`InMemoryFactory`] share one [`InMemoryBroker`].
//! The broker is created by whoever composes the system and handed to the
//! factory; nothing here is global.
//!
//! The broker keeps, per owner id, one session: the owner's inbound queue
//! and its subscription set. Both live behind a single lock so that renaming
//! an owner moves them together.

use crate::factory::{BackendConfiguration, MESSAGING_TYPE_PROPERTY};
use crate::{
    ClientFactory, ClientIdentity, InboundQueue, Message, MessagingClient, MessagingContext,
    OwnerId, TransportError,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

pub const IN_MEMORY_TYPE: &str = "in-memory";

/// Label used in logs for clients of this backend
pub const IN_MEMORY_NAME_PROPERTY: &str = "in-memory.name";

#[derive(Debug)]
struct Session {
    id: Uuid,
    queue: Arc<InboundQueue>,
    subscriptions: HashSet<MessagingContext>,
}

/// Shared routing table of the in-memory backend
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    sessions: RwLock<HashMap<OwnerId, Session>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `owner`, replacing any previous one
    ///
    /// A replaced session loses its subscriptions; the new client is
    /// expected to subscribe again.
    pub fn open_session(&self, owner: &OwnerId, queue: Arc<InboundQueue>) -> Uuid {
        let id = Uuid::new_v4();
        let previous = self.sessions.write().insert(
            owner.clone(),
            Session {
                id,
                queue,
                subscriptions: HashSet::new(),
            },
        );
        if previous.is_some() {
            tracing::debug!("Session of '{}' replaced by a new connection", owner);
        }
        id
    }

    /// Close a session; a stale session id is ignored
    pub fn close_session(&self, owner: &OwnerId, session: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(owner) {
            Some(current) if current.id == session => sessions.remove(owner).is_some(),
            _ => false,
        }
    }

    pub fn subscribe(&self, owner: &OwnerId, session: Uuid, ctx: &MessagingContext) -> bool {
        match self.sessions.write().get_mut(owner) {
            Some(current) if current.id == session => {
                current.subscriptions.insert(ctx.clone());
                true
            }
            _ => false,
        }
    }

    pub fn unsubscribe(&self, owner: &OwnerId, session: Uuid, ctx: &MessagingContext) -> bool {
        match self.sessions.write().get_mut(owner) {
            Some(current) if current.id == session => current.subscriptions.remove(ctx),
            _ => false,
        }
    }

    /// Deliver `message` to every owner subscribed to `ctx`
    ///
    /// Returns the number of queues the message was pushed to.
    pub fn publish(&self, ctx: &MessagingContext, message: &Message) -> usize {
        let sessions = self.sessions.read();
        let mut delivered = 0;
        for session in sessions.values() {
            if session.subscriptions.contains(ctx) {
                session.queue.push(message.clone());
                delivered += 1;
            }
        }
        delivered
    }

    /// Move a session from one owner id to another
    pub fn rename(&self, old: &OwnerId, new: &OwnerId, session: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(old) {
            Some(current) if current.id == session => {}
            _ => return false,
        }
        match sessions.remove(old) {
            Some(moved) => {
                sessions.insert(new.clone(), moved);
                true
            }
            None => false,
        }
    }

    /// Drop every subscription to contexts of an application
    pub fn delete_application(&self, domain: &str, application: &str) -> usize {
        let mut removed = 0;
        for session in self.sessions.write().values_mut() {
            let before = session.subscriptions.len();
            session
                .subscriptions
                .retain(|ctx| !ctx.belongs_to(domain, application));
            removed += before - session.subscriptions.len();
        }
        removed
    }

    pub fn subscriptions(&self, owner: &OwnerId) -> HashSet<MessagingContext> {
        self.sessions
            .read()
            .get(owner)
            .map(|s| s.subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn has_owner(&self, owner: &OwnerId) -> bool {
        self.sessions.read().contains_key(owner)
    }

    pub fn owner_count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Factory of the in-memory backend
#[derive(Debug)]
pub struct InMemoryFactory {
    broker: Arc<InMemoryBroker>,
    name: RwLock<String>,
}

impl InMemoryFactory {
    pub fn new(broker: Arc<InMemoryBroker>) -> Self {
        Self {
            broker,
            name: RwLock::new(IN_MEMORY_TYPE.to_string()),
        }
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }
}

impl ClientFactory for InMemoryFactory {
    fn type_name(&self) -> &str {
        IN_MEMORY_TYPE
    }

    fn apply_configuration(&self, configuration: &BackendConfiguration) -> bool {
        if let Some(requested) = configuration.get(MESSAGING_TYPE_PROPERTY) {
            if requested != IN_MEMORY_TYPE {
                return false;
            }
        }

        let prefix = format!("{}.", IN_MEMORY_TYPE);
        let unknown = configuration
            .keys()
            .find(|k| k.starts_with(&prefix) && k.as_str() != IN_MEMORY_NAME_PROPERTY);
        if let Some(key) = unknown {
            tracing::warn!("Unknown in-memory messaging property '{}'", key);
            return false;
        }

        if let Some(name) = configuration.get(IN_MEMORY_NAME_PROPERTY) {
            *self.name.write() = name.clone();
        }
        true
    }

    fn create_client(
        &self,
        identity: ClientIdentity,
        queue: Arc<InboundQueue>,
    ) -> Arc<dyn MessagingClient> {
        Arc::new(InMemoryClient {
            broker: self.broker.clone(),
            identity: RwLock::new(identity),
            queue,
            session: Mutex::new(None),
            name: self.name.read().clone(),
        })
    }
}

#[derive(Debug)]
pub struct InMemoryClient {
    broker: Arc<InMemoryBroker>,
    identity: RwLock<ClientIdentity>,
    queue: Arc<InboundQueue>,
    session: Mutex<Option<Uuid>>,
    name: String,
}

impl InMemoryClient {
    fn current_session(&self) -> Option<Uuid> {
        *self.session.lock()
    }
}

#[async_trait]
impl MessagingClient for InMemoryClient {
    fn backend_type(&self) -> &str {
        IN_MEMORY_TYPE
    }

    fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    async fn open_connection(&self) -> Result<(), TransportError> {
        // Lock order is identity, then session
        let identity = self.identity.read();
        let mut session = self.session.lock();
        if session.is_none() {
            let owner = identity.owner_id();
            *session = Some(self.broker.open_session(&owner, self.queue.clone()));
            tracing::debug!("'{}' connected '{}'", self.name, owner);
        }
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), TransportError> {
        let identity = self.identity.read();
        let closed = self.session.lock().take();
        if let Some(session) = closed {
            let owner = identity.owner_id();
            self.broker.close_session(&owner, session);
            tracing::debug!("'{}' disconnected '{}'", self.name, owner);
        }
        Ok(())
    }

    async fn publish(
        &self,
        ctx: &MessagingContext,
        message: &Message,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            tracing::debug!("Not connected, '{}' for {} not published", message.kind(), ctx);
            return Ok(());
        }

        let delivered = self.broker.publish(ctx, message);
        tracing::trace!("'{}' delivered to {} queue(s) for {}", message.kind(), delivered, ctx);
        Ok(())
    }

    async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), TransportError> {
        let Some(session) = self.current_session() else {
            tracing::debug!("Not connected, subscription to {} ignored", ctx);
            return Ok(());
        };

        if !self.broker.subscribe(&self.owner_id(), session, ctx) {
            return Err(TransportError::subscribe_failed(
                "session was replaced by another connection",
                ctx,
            ));
        }
        Ok(())
    }

    async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), TransportError> {
        if let Some(session) = self.current_session() {
            self.broker.unsubscribe(&self.owner_id(), session, ctx);
        }
        Ok(())
    }

    async fn delete_server_artifacts(&self, application: &str) -> Result<(), TransportError> {
        let domain = self.identity.read().domain.clone();
        let removed = self.broker.delete_application(&domain, application);
        tracing::debug!(
            "Removed {} subscription(s) of application '{}'",
            removed,
            application
        );
        Ok(())
    }

    fn identity(&self) -> ClientIdentity {
        self.identity.read().clone()
    }

    async fn set_identity(&self, identity: ClientIdentity) -> Result<(), TransportError> {
        let mut current = self.identity.write();
        let old = current.owner_id();
        let new = identity.owner_id();

        if old != new {
            if let Some(session) = self.current_session() {
                if !self.broker.rename(&old, &new, session) {
                    // A newer connection of the same owner took the session
                    // over; that one moves the shared state.
                    if !self.broker.has_owner(&old) && !self.broker.has_owner(&new) {
                        return Err(TransportError::ConnectionLost(format!(
                            "session of '{}' no longer exists",
                            old
                        )));
                    }
                    tracing::debug!(
                        "'{}' session of '{}' was replaced, identity updated only",
                        self.name,
                        old
                    );
                }
            }
        }

        *current = identity;
        Ok(())
    }

    fn configuration(&self) -> HashMap<String, String> {
        HashMap::from([
            (MESSAGING_TYPE_PROPERTY.to_string(), IN_MEMORY_TYPE.to_string()),
            (IN_MEMORY_NAME_PROPERTY.to_string(), self.name.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(
        broker: &Arc<InMemoryBroker>,
        identity: ClientIdentity,
    ) -> (Arc<dyn MessagingClient>, Arc<InboundQueue>) {
        let factory = InMemoryFactory::new(broker.clone());
        let queue = Arc::new(InboundQueue::new());
        (factory.create_client(identity, queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_only() {
        let broker = Arc::new(InMemoryBroker::new());
        let (dm, dm_queue) = client_for(&broker, ClientIdentity::control_plane("d"));
        let (agent, agent_queue) = client_for(&broker, ClientIdentity::agent("d", "app", "/vm"));

        dm.open_connection().await.unwrap();
        agent.open_connection().await.unwrap();
        agent
            .subscribe(&MessagingContext::for_agent("d", "app", "/vm"))
            .await
            .unwrap();

        dm.publish(
            &MessagingContext::for_agent("d", "app", "/vm"),
            &Message::Resynchronize,
        )
        .await
        .unwrap();
        dm.publish(
            &MessagingContext::for_agent("d", "app", "/other"),
            &Message::SendInstances,
        )
        .await
        .unwrap();

        assert_eq!(agent_queue.drain(), vec![Message::Resynchronize]);
        assert!(dm_queue.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let broker = Arc::new(InMemoryBroker::new());
        let identity = ClientIdentity::control_plane("d");
        let owner = identity.owner_id();
        let (client, queue) = client_for(&broker, identity);
        client.open_connection().await.unwrap();

        let ctx = MessagingContext::for_dm("d", "app");
        client.subscribe(&ctx).await.unwrap();
        client.subscribe(&ctx).await.unwrap();
        assert_eq!(broker.subscriptions(&owner).len(), 1);

        broker.publish(&ctx, &Message::Resynchronize);
        assert_eq!(queue.len(), 1);

        client.unsubscribe(&ctx).await.unwrap();
        client.unsubscribe(&ctx).await.unwrap();
        client
            .unsubscribe(&MessagingContext::for_dm("d", "never-subscribed"))
            .await
            .unwrap();
        assert!(broker.subscriptions(&owner).is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_operations_leave_no_state() {
        let broker = Arc::new(InMemoryBroker::new());
        let identity = ClientIdentity::agent("d", "app", "/vm");
        let owner = identity.owner_id();
        let (client, _queue) = client_for(&broker, identity);

        assert!(!client.is_connected());
        let ctx = MessagingContext::for_agent("d", "app", "/vm");
        client.subscribe(&ctx).await.unwrap();
        client.publish(&ctx, &Message::Resynchronize).await.unwrap();

        assert!(!broker.has_owner(&owner));
        assert!(broker.subscriptions(&owner).is_empty());
        assert_eq!(broker.owner_count(), 0);
    }

    #[tokio::test]
    async fn test_rename_moves_queue_and_subscriptions() {
        let broker = Arc::new(InMemoryBroker::new());
        let identity = ClientIdentity::agent("d", "app", "/vm");
        let old_owner = identity.owner_id();
        let (client, queue) = client_for(&broker, identity);
        client.open_connection().await.unwrap();

        let ctx = MessagingContext::for_agent("d", "app", "/vm");
        client.subscribe(&ctx).await.unwrap();

        let renamed = ClientIdentity::agent("d", "app", "/vm-renamed");
        let new_owner = renamed.owner_id();
        client.set_identity(renamed).await.unwrap();

        assert!(!broker.has_owner(&old_owner));
        assert!(broker.has_owner(&new_owner));
        assert!(broker.subscriptions(&new_owner).contains(&ctx));

        broker.publish(&ctx, &Message::SendInstances);
        assert_eq!(queue.drain(), vec![Message::SendInstances]);
    }

    #[tokio::test]
    async fn test_replaced_session_is_not_closed_by_stale_client() {
        let broker = Arc::new(InMemoryBroker::new());
        let identity = ClientIdentity::control_plane("d");
        let owner = identity.owner_id();
        let (old, _) = client_for(&broker, identity.clone());
        let (new, _) = client_for(&broker, identity);

        old.open_connection().await.unwrap();
        new.open_connection().await.unwrap();
        new.subscribe(&MessagingContext::for_dm("d", "app")).await.unwrap();

        old.close_connection().await.unwrap();
        assert!(broker.has_owner(&owner));
        assert_eq!(broker.subscriptions(&owner).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_server_artifacts() {
        let broker = Arc::new(InMemoryBroker::new());
        let identity = ClientIdentity::control_plane("d");
        let owner = identity.owner_id();
        let (client, _) = client_for(&broker, identity);
        client.open_connection().await.unwrap();

        client.subscribe(&MessagingContext::for_dm("d", "app1")).await.unwrap();
        client.subscribe(&MessagingContext::for_dm("d", "app2")).await.unwrap();
        client.delete_server_artifacts("app1").await.unwrap();

        let remaining = broker.subscriptions(&owner);
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&MessagingContext::for_dm("d", "app2")));
    }

    #[test]
    fn test_apply_configuration() {
        let factory = InMemoryFactory::new(Arc::new(InMemoryBroker::new()));

        assert!(factory.apply_configuration(&BackendConfiguration::new()));
        assert!(factory.apply_configuration(&BackendConfiguration::from([
            (MESSAGING_TYPE_PROPERTY.to_string(), IN_MEMORY_TYPE.to_string()),
            (IN_MEMORY_NAME_PROPERTY.to_string(), "local".to_string()),
        ])));
        assert!(!factory.apply_configuration(&BackendConfiguration::from([(
            MESSAGING_TYPE_PROPERTY.to_string(),
            "amqp".to_string()
        )])));
        assert!(!factory.apply_configuration(&BackendConfiguration::from([(
            "in-memory.capacity".to_string(),
            "10".to_string()
        )])));
    }
}
