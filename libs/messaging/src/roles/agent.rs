use crate::factory::BackendConfiguration;
use crate::{
    ClientIdentity, FactoryRegistry, Message, MessagingContext, MessagingError,
    ReconfigurableClient,
};
use std::sync::Arc;

/// Messaging client of an agent
///
/// An agent acts for one root instance. It receives commands on its own
/// scoped context and sends notifications to the DM of its application.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Arc<ReconfigurableClient>,
}

impl AgentClient {
    pub fn new(
        registry: Arc<FactoryRegistry>,
        domain: impl Into<String>,
        application: impl Into<String>,
        root_instance_path: impl Into<String>,
    ) -> Self {
        let identity = ClientIdentity::agent(domain, application, root_instance_path);
        Self {
            client: ReconfigurableClient::new(registry, identity),
        }
    }

    pub fn client(&self) -> &Arc<ReconfigurableClient> {
        &self.client
    }

    pub fn identity(&self) -> ClientIdentity {
        self.client.identity()
    }

    pub async fn switch_backend(
        &self,
        configuration: BackendConfiguration,
    ) -> Result<(), MessagingError> {
        self.client.switch_backend(configuration).await
    }

    fn own_context(identity: &ClientIdentity) -> Result<MessagingContext, MessagingError> {
        identity.own_context().ok_or_else(|| {
            MessagingError::InvalidConfiguration(format!(
                "'{}' has no scoped instance",
                identity.owner_id()
            ))
        })
    }

    fn dm_context(identity: &ClientIdentity) -> MessagingContext {
        MessagingContext::for_dm(
            identity.domain.clone(),
            identity.application.clone().unwrap_or_default(),
        )
    }

    /// Send a notification to the DM
    pub async fn send_to_dm(&self, message: &Message) -> Result<(), MessagingError> {
        let ctx = Self::dm_context(&self.identity());
        self.client.publish(&ctx, message).await
    }

    /// Start receiving the commands the DM sends to this agent
    pub async fn listen_to_dm(&self) -> Result<(), MessagingError> {
        let ctx = Self::own_context(&self.identity())?;
        self.client.subscribe(&ctx).await
    }

    pub async fn stop_listening_to_dm(&self) -> Result<(), MessagingError> {
        let ctx = Self::own_context(&self.identity())?;
        self.client.unsubscribe(&ctx).await
    }

    /// Act for another root instance
    ///
    /// The owner id changes with it; queued messages move along. If the
    /// agent was listening to the DM it now listens on the new instance's
    /// context instead.
    pub async fn rescope(
        &self,
        application: impl Into<String>,
        root_instance_path: impl Into<String>,
    ) -> Result<(), MessagingError> {
        let old = self.identity();
        let new = ClientIdentity::agent(old.domain.clone(), application, root_instance_path);
        if new == old {
            return Ok(());
        }

        let old_ctx = Self::own_context(&old)?;
        let was_listening = self.client.subscriptions().contains(&old_ctx);

        self.client.set_identity(new.clone()).await?;
        if was_listening {
            self.client.unsubscribe(&old_ctx).await?;
            self.client.subscribe(&Self::own_context(&new)?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryBroker, InMemoryFactory, IN_MEMORY_TYPE};
    use crate::test_utils::backend_configuration;
    use std::collections::HashSet;

    async fn connected_agent(path: &str) -> (AgentClient, Arc<InMemoryBroker>) {
        let registry = Arc::new(FactoryRegistry::new());
        let broker = Arc::new(InMemoryBroker::new());
        registry
            .register(Arc::new(InMemoryFactory::new(broker.clone())))
            .await;

        let agent = AgentClient::new(registry, "d", "app", path);
        agent
            .switch_backend(backend_configuration(IN_MEMORY_TYPE))
            .await
            .unwrap();
        agent.client().adopt_pending_client().await;
        (agent, broker)
    }

    #[tokio::test]
    async fn test_receives_commands_on_own_context() {
        let (agent, broker) = connected_agent("/vm").await;
        agent.listen_to_dm().await.unwrap();

        broker.publish(
            &MessagingContext::for_agent("d", "app", "/vm"),
            &Message::Resynchronize,
        );
        broker.publish(
            &MessagingContext::for_agent("d", "app", "/other"),
            &Message::SendInstances,
        );
        assert_eq!(agent.client().queue().drain(), vec![Message::Resynchronize]);
    }

    #[tokio::test]
    async fn test_notifications_reach_the_dm() {
        let (agent, broker) = connected_agent("/vm").await;
        let dm_queue = Arc::new(crate::InboundQueue::new());
        let dm_owner = ClientIdentity::control_plane("d").owner_id();
        let session = broker.open_session(&dm_owner, dm_queue.clone());
        broker.subscribe(&dm_owner, session, &MessagingContext::for_dm("d", "app"));

        let heartbeat = Message::Heartbeat {
            application: "app".to_string(),
            root_instance_path: "/vm".to_string(),
            ip_address: None,
        };
        agent.send_to_dm(&heartbeat).await.unwrap();
        assert_eq!(dm_queue.drain(), vec![heartbeat]);
    }

    #[tokio::test]
    async fn test_rescope_follows_the_new_instance() {
        let (agent, broker) = connected_agent("/vm").await;
        agent.listen_to_dm().await.unwrap();
        let old_owner = agent.identity().owner_id();

        agent.rescope("app", "/vm2").await.unwrap();
        let new_owner = agent.identity().owner_id();

        assert!(!broker.has_owner(&old_owner));
        let subscriptions = broker.subscriptions(&new_owner);
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions.contains(&MessagingContext::for_agent("d", "app", "/vm2")));
    }

    #[tokio::test]
    async fn test_rescope_while_a_switch_is_pending() {
        let (agent, broker) = connected_agent("/vm").await;
        agent.listen_to_dm().await.unwrap();
        let old_owner = agent.identity().owner_id();

        // Same backend again: the pending client takes the broker session over
        let mut renamed = backend_configuration(IN_MEMORY_TYPE);
        renamed.insert(
            crate::backends::IN_MEMORY_NAME_PROPERTY.to_string(),
            "renamed".to_string(),
        );
        agent.switch_backend(renamed).await.unwrap();
        assert!(agent.client().has_pending_client());

        agent.rescope("app", "/vm2").await.unwrap();
        let new_owner = agent.identity().owner_id();
        let new_ctx = MessagingContext::for_agent("d", "app", "/vm2");

        assert!(!broker.has_owner(&old_owner));
        assert_eq!(broker.subscriptions(&new_owner), HashSet::from([new_ctx.clone()]));

        // Adopting closes the stale client without touching the moved session
        assert!(agent.client().adopt_pending_client().await);
        assert_eq!(broker.subscriptions(&new_owner), HashSet::from([new_ctx.clone()]));

        broker.publish(&new_ctx, &Message::SendInstances);
        assert_eq!(agent.client().queue().drain(), vec![Message::SendInstances]);
    }
}
