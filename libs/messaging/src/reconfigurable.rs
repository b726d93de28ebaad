//! Messaging client whose backend can be replaced at runtime
//!
//! ## Hot-swap protocol
//!
//! ```text
//!   caller task                         processor task
//!   -----------                         --------------
//!   switch_backend(config)
//!     lookup factory, apply config
//!     create client, open, resubscribe
//!     slots.pending = new  ------------>  adopt_pending_client()
//!     (superseded pending is closed)        swap current <- pending
//!                                           close previous current
//! ```
//!
//! The current/pending pair lives behind one lock. Callers only ever clone
//! the current client out of it, so an in-flight publish finishes on the
//! client it started with, and the old client is closed only after the swap.
//! Only the processor loop moves pending into current.
//!
//! The owner identity and the inbound queue belong to this wrapper, not to
//! the backend: every backend client is built with the same queue, and the
//! contexts subscribed through this wrapper are replayed on each new client.

use crate::backends::DismissClient;
use crate::factory::{BackendConfiguration, MESSAGING_TYPE_PROPERTY};
use crate::{
    ClientFactory, ClientIdentity, FactoryListener, FactoryRegistry, InboundQueue, Message,
    MessagingClient, MessagingContext, MessagingError, MessagingMetrics, OwnerId,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;

struct ClientSlots {
    current: Arc<dyn MessagingClient>,
    pending: Option<Arc<dyn MessagingClient>>,
}

impl ClientSlots {
    /// Clients traffic should currently go to, connected ones only
    fn connected(&self) -> Vec<Arc<dyn MessagingClient>> {
        std::iter::once(&self.current)
            .chain(self.pending.iter())
            .filter(|c| c.is_connected())
            .cloned()
            .collect()
    }

    /// Client that will carry traffic once any pending switch is adopted
    fn newest_connected(&self) -> Option<Arc<dyn MessagingClient>> {
        self.pending
            .as_ref()
            .filter(|p| p.is_connected())
            .or_else(|| Some(&self.current).filter(|c| c.is_connected()))
            .cloned()
    }

    fn all(&self) -> Vec<Arc<dyn MessagingClient>> {
        std::iter::once(&self.current)
            .chain(self.pending.iter())
            .cloned()
            .collect()
    }
}

pub struct ReconfigurableClient {
    registry: Arc<FactoryRegistry>,
    identity: RwLock<ClientIdentity>,
    queue: Arc<InboundQueue>,
    slots: Mutex<ClientSlots>,
    subscriptions: Mutex<HashSet<MessagingContext>>,
    preferred: RwLock<Option<BackendConfiguration>>,
    /// Serializes switches, identity changes and subscription changes
    reconfiguration: tokio::sync::Mutex<()>,
    metrics: Arc<MessagingMetrics>,
}

impl std::fmt::Debug for ReconfigurableClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconfigurableClient")
            .field("owner", &self.owner_id())
            .field("backend", &self.current_backend_type())
            .finish_non_exhaustive()
    }
}

impl ReconfigurableClient {
    /// Create a client with no backend yet
    ///
    /// The client listens to `registry`, so a backend configured before its
    /// factory is registered gets picked up as soon as it appears.
    pub fn new(registry: Arc<FactoryRegistry>, identity: ClientIdentity) -> Arc<Self> {
        let client = Arc::new(Self {
            registry: registry.clone(),
            slots: Mutex::new(ClientSlots {
                current: Arc::new(DismissClient::new(identity.clone())),
                pending: None,
            }),
            identity: RwLock::new(identity),
            queue: Arc::new(InboundQueue::new()),
            subscriptions: Mutex::new(HashSet::new()),
            preferred: RwLock::new(None),
            reconfiguration: tokio::sync::Mutex::new(()),
            metrics: Arc::new(MessagingMetrics::new()),
        });

        let weak = Arc::downgrade(&client);
        registry.add_listener(weak);
        client
    }

    pub fn identity(&self) -> ClientIdentity {
        self.identity.read().clone()
    }

    pub fn owner_id(&self) -> OwnerId {
        self.identity.read().owner_id()
    }

    pub fn queue(&self) -> &Arc<InboundQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<MessagingMetrics> {
        &self.metrics
    }

    /// Client all traffic currently goes through
    pub fn current_client(&self) -> Arc<dyn MessagingClient> {
        self.slots.lock().current.clone()
    }

    pub fn current_backend_type(&self) -> String {
        self.slots.lock().current.backend_type().to_string()
    }

    /// Check if a switch is waiting for the processor to adopt it
    pub fn has_pending_client(&self) -> bool {
        self.slots.lock().pending.is_some()
    }

    /// Backend type requested by the last configuration, if any
    pub fn preferred_backend_type(&self) -> Option<String> {
        self.preferred
            .read()
            .as_ref()
            .and_then(|c| c.get(MESSAGING_TYPE_PROPERTY).cloned())
    }

    pub fn is_connected(&self) -> bool {
        self.current_client().is_connected()
    }

    /// Contexts subscribed through this client
    pub fn subscriptions(&self) -> HashSet<MessagingContext> {
        self.subscriptions.lock().clone()
    }

    /// Prepare a new backend from `configuration`
    ///
    /// The factory is resolved from the `messaging.type` entry. The new
    /// client is configured, connected and subscribed to every context of
    /// the current one, then parked as pending until the processor adopts
    /// it. A previous pending client that was never adopted is closed.
    ///
    /// When no factory is registered for the requested type the request is
    /// remembered, [`MessagingError::UnknownBackend`] is returned, and the
    /// switch happens as soon as such a factory is registered.
    pub async fn switch_backend(
        &self,
        configuration: BackendConfiguration,
    ) -> Result<(), MessagingError> {
        let _guard = self.reconfiguration.lock().await;

        let type_name = configuration
            .get(MESSAGING_TYPE_PROPERTY)
            .cloned()
            .ok_or(MessagingError::MissingBackendType)?;

        let Some(factory) = self.registry.lookup(&type_name) else {
            tracing::warn!(
                "Messaging backend '{}' is not available yet for '{}'",
                type_name,
                self.owner_id()
            );
            *self.preferred.write() = Some(configuration);
            self.install_pending(Arc::new(DismissClient::new(self.identity())))
                .await;
            return Err(MessagingError::UnknownBackend(type_name));
        };

        self.switch_to(factory, configuration).await
    }

    /// Caller must hold the reconfiguration lock
    async fn switch_to(
        &self,
        factory: Arc<dyn ClientFactory>,
        configuration: BackendConfiguration,
    ) -> Result<(), MessagingError> {
        let type_name = factory.type_name().to_string();
        if !factory.apply_configuration(&configuration) {
            tracing::warn!("Messaging backend '{}' rejected its configuration", type_name);
            return Err(MessagingError::InvalidConfiguration(type_name));
        }
        *self.preferred.write() = Some(configuration);

        let client = factory.create_client(self.identity(), self.queue.clone());
        client.open_connection().await?;

        let contexts = self.subscriptions();
        for ctx in &contexts {
            if let Err(e) = client.subscribe(ctx).await {
                close_quietly(client.as_ref(), "unused").await;
                return Err(e.into());
            }
        }

        tracing::info!(
            "Messaging backend '{}' ready for '{}' ({} subscription(s) carried over)",
            type_name,
            self.owner_id(),
            contexts.len()
        );
        self.install_pending(client).await;
        Ok(())
    }

    async fn install_pending(&self, client: Arc<dyn MessagingClient>) {
        let superseded = self.slots.lock().pending.replace(client);
        if let Some(superseded) = superseded {
            tracing::debug!(
                "Discarding unadopted '{}' client of '{}'",
                superseded.backend_type(),
                self.owner_id()
            );
            close_quietly(superseded.as_ref(), "superseded").await;
        }
    }

    /// Swap the pending client in, if there is one
    ///
    /// Called from the processor loop. The previous current client is closed
    /// after the swap; a failure to close it is logged and ignored.
    pub async fn adopt_pending_client(&self) -> bool {
        let previous = {
            let mut slots = self.slots.lock();
            match slots.pending.take() {
                Some(pending) => std::mem::replace(&mut slots.current, pending),
                None => return false,
            }
        };

        tracing::info!(
            "'{}' switched messaging backend from '{}' to '{}'",
            self.owner_id(),
            previous.backend_type(),
            self.current_backend_type()
        );
        close_quietly(previous.as_ref(), "previous").await;
        true
    }

    /// Publish through the current client
    ///
    /// Silently does nothing while disconnected. Successful and failed
    /// sends are counted in [`metrics`](Self::metrics).
    pub async fn publish(
        &self,
        ctx: &MessagingContext,
        message: &Message,
    ) -> Result<(), MessagingError> {
        let client = self.current_client();
        if !client.is_connected() {
            tracing::debug!("Not connected, '{}' for {} dropped", message.kind(), ctx);
            return Ok(());
        }

        match client.publish(ctx, message).await {
            Ok(()) => {
                self.metrics.record_sent();
                Ok(())
            }
            Err(e) => {
                self.metrics.record_send_failure();
                Err(e.into())
            }
        }
    }

    /// Subscribe to `ctx` (idempotent, no-op while disconnected)
    pub async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError> {
        let _guard = self.reconfiguration.lock().await;

        // A pending client already replaced the current one on the backend
        let client = self.slots.lock().newest_connected();
        let Some(client) = client else {
            tracing::debug!("Not connected, subscription to {} ignored", ctx);
            return Ok(());
        };

        client.subscribe(ctx).await?;
        self.subscriptions.lock().insert(ctx.clone());
        Ok(())
    }

    /// Unsubscribe from `ctx` (no-op if not subscribed)
    pub async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), MessagingError> {
        let _guard = self.reconfiguration.lock().await;

        if !self.subscriptions.lock().remove(ctx) {
            return Ok(());
        }

        let clients = self.slots.lock().connected();
        for client in clients {
            client.unsubscribe(ctx).await?;
        }
        Ok(())
    }

    pub async fn delete_server_artifacts(&self, application: &str) -> Result<(), MessagingError> {
        let client = self.current_client();
        client.delete_server_artifacts(application).await?;

        self.subscriptions
            .lock()
            .retain(|ctx| ctx.application != application);
        Ok(())
    }

    /// Change the identity-defining properties of the owner
    ///
    /// When the owner id changes, the backend moves the queue and the
    /// subscriptions to the new id; nothing is left under the old one.
    pub async fn set_identity(&self, identity: ClientIdentity) -> Result<(), MessagingError> {
        let _guard = self.reconfiguration.lock().await;

        let old = self.owner_id();
        let new = identity.owner_id();

        let clients = self.slots.lock().all();
        for client in clients {
            client.set_identity(identity.clone()).await?;
        }
        *self.identity.write() = identity;

        if old != new {
            tracing::info!("Messaging owner '{}' is now '{}'", old, new);
        }
        Ok(())
    }

    /// Close every client and fall back to no backend
    pub async fn close(&self) {
        let _guard = self.reconfiguration.lock().await;

        let dismiss: Arc<dyn MessagingClient> = Arc::new(DismissClient::new(self.identity()));
        let (current, pending) = {
            let mut slots = self.slots.lock();
            (
                std::mem::replace(&mut slots.current, dismiss),
                slots.pending.take(),
            )
        };

        if let Some(pending) = pending {
            close_quietly(pending.as_ref(), "pending").await;
        }
        close_quietly(current.as_ref(), "current").await;
    }
}

async fn close_quietly(client: &dyn MessagingClient, role: &str) {
    if let Err(e) = client.close_connection().await {
        tracing::warn!(
            "Failed to close {} '{}' client of '{}': {}",
            role,
            client.backend_type(),
            client.owner_id(),
            e
        );
    }
}

#[async_trait]
impl FactoryListener for ReconfigurableClient {
    async fn factory_added(&self, factory: Arc<dyn ClientFactory>) -> Result<(), MessagingError> {
        if self.preferred_backend_type().as_deref() != Some(factory.type_name()) {
            return Ok(());
        }

        let _guard = self.reconfiguration.lock().await;
        let already_there = {
            let slots = self.slots.lock();
            slots.current.backend_type() == factory.type_name()
                || slots
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.backend_type() == factory.type_name())
        };
        if already_there {
            return Ok(());
        }

        let Some(configuration) = self.preferred.read().clone() else {
            return Ok(());
        };
        tracing::info!(
            "Messaging backend '{}' became available for '{}'",
            factory.type_name(),
            self.owner_id()
        );
        self.switch_to(factory, configuration).await
    }

    async fn factory_removed(
        &self,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<(), MessagingError> {
        let _guard = self.reconfiguration.lock().await;

        let in_use = {
            let slots = self.slots.lock();
            slots.current.backend_type() == factory.type_name()
                || slots
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.backend_type() == factory.type_name())
        };
        if in_use {
            tracing::warn!(
                "Messaging backend '{}' went away, '{}' has no backend",
                factory.type_name(),
                self.owner_id()
            );
            self.install_pending(Arc::new(DismissClient::new(self.identity())))
                .await;
        }
        Ok(())
    }
}
