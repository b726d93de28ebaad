use crate::{ClientIdentity, Message, MessagingContext, OwnerId, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

/// Transport-facing capability implemented by every messaging backend
///
/// Operations fail with a [`TransportError`] when the backend is unreachable
/// or misconfigured. No retries happen at this layer.
///
/// `publish`, `subscribe` and `unsubscribe` on a client whose connection is
/// not open are silent no-ops: they return `Ok(())` and leave no state
/// behind. Callers can keep issuing traffic through a reconnection window
/// without special-casing it.
#[async_trait]
pub trait MessagingClient: Send + Sync + Debug {
    /// Type name of the factory that built this client
    fn backend_type(&self) -> &str;

    /// Check if the connection is currently open
    fn is_connected(&self) -> bool;

    /// Open the connection (no-op if already open)
    async fn open_connection(&self) -> Result<(), TransportError>;

    /// Close the connection and drop this owner's server-side state
    async fn close_connection(&self) -> Result<(), TransportError>;

    /// Send a message to every owner subscribed to `ctx`
    async fn publish(
        &self,
        ctx: &MessagingContext,
        message: &Message,
    ) -> Result<(), TransportError>;

    /// Start receiving messages published to `ctx` (idempotent)
    async fn subscribe(&self, ctx: &MessagingContext) -> Result<(), TransportError>;

    /// Stop receiving messages published to `ctx` (no-op if not subscribed)
    async fn unsubscribe(&self, ctx: &MessagingContext) -> Result<(), TransportError>;

    /// Remove whatever the backend keeps for an application of this
    /// client's domain
    async fn delete_server_artifacts(&self, application: &str) -> Result<(), TransportError>;

    /// Identity this client currently acts for
    fn identity(&self) -> ClientIdentity;

    /// Adopt a new identity, moving subscriptions and queued work from the
    /// old owner id to the new one
    async fn set_identity(&self, identity: ClientIdentity) -> Result<(), TransportError>;

    fn owner_id(&self) -> OwnerId {
        self.identity().owner_id()
    }

    /// Backend-specific settings currently in effect, for diagnostics
    fn configuration(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}
