use crate::{ClientIdentity, Message, MessagingClient, MessagingContext, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;

pub const DISMISS_TYPE: &str = "dismiss";

/// Placeholder client used while no backend is available
///
/// Never connected; every operation is a silent no-op.
#[derive(Debug)]
pub struct DismissClient {
    identity: RwLock<ClientIdentity>,
}

impl DismissClient {
    pub fn new(identity: ClientIdentity) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }
}

#[async_trait]
impl MessagingClient for DismissClient {
    fn backend_type(&self) -> &str {
        DISMISS_TYPE
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn open_connection(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn publish(
        &self,
        ctx: &MessagingContext,
        message: &Message,
    ) -> Result<(), TransportError> {
        tracing::debug!(
            "No messaging backend, dropping '{}' for {}",
            message.kind(),
            ctx
        );
        Ok(())
    }

    async fn subscribe(&self, _ctx: &MessagingContext) -> Result<(), TransportError> {
        Ok(())
    }

    async fn unsubscribe(&self, _ctx: &MessagingContext) -> Result<(), TransportError> {
        Ok(())
    }

    async fn delete_server_artifacts(&self, _application: &str) -> Result<(), TransportError> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_everything_is_a_no_op() {
        let client = DismissClient::new(ClientIdentity::control_plane("d"));
        client.open_connection().await.unwrap();
        assert!(!client.is_connected());

        let ctx = MessagingContext::for_dm("d", "app");
        assert!(client.subscribe(&ctx).await.is_ok());
        assert!(client.publish(&ctx, &Message::Resynchronize).await.is_ok());
        assert!(client.unsubscribe(&ctx).await.is_ok());
        assert!(client.delete_server_artifacts("app").await.is_ok());
        assert!(client.close_connection().await.is_ok());
        assert_eq!(client.backend_type(), DISMISS_TYPE);
    }
}
