use crate::factory::BackendConfiguration;
use crate::{
    ClientIdentity, FactoryRegistry, Message, MessagingContext, MessagingError,
    ReconfigurableClient,
};
use std::sync::Arc;

/// Messaging client of the deployment manager
///
/// Commands go to the agent of one root instance; notifications are
/// received per application.
#[derive(Debug, Clone)]
pub struct DmClient {
    client: Arc<ReconfigurableClient>,
    domain: String,
}

impl DmClient {
    pub fn new(registry: Arc<FactoryRegistry>, domain: impl Into<String>) -> Self {
        let domain = domain.into();
        let client = ReconfigurableClient::new(registry, ClientIdentity::control_plane(&domain));
        Self { client, domain }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn client(&self) -> &Arc<ReconfigurableClient> {
        &self.client
    }

    pub async fn switch_backend(
        &self,
        configuration: BackendConfiguration,
    ) -> Result<(), MessagingError> {
        self.client.switch_backend(configuration).await
    }

    /// Send a command to the agent managing `root_instance_path`
    pub async fn send_to_agent(
        &self,
        application: &str,
        root_instance_path: &str,
        message: &Message,
    ) -> Result<(), MessagingError> {
        let ctx = MessagingContext::for_agent(&self.domain, application, root_instance_path);
        self.client.publish(&ctx, message).await
    }

    /// Start receiving notifications from the agents of `application`
    pub async fn listen_to_agents(&self, application: &str) -> Result<(), MessagingError> {
        self.client
            .subscribe(&MessagingContext::for_dm(&self.domain, application))
            .await
    }

    pub async fn stop_listening_to_agents(&self, application: &str) -> Result<(), MessagingError> {
        self.client
            .unsubscribe(&MessagingContext::for_dm(&self.domain, application))
            .await
    }

    /// Stop listening to `application` and drop its backend state
    pub async fn delete_application_artifacts(
        &self,
        application: &str,
    ) -> Result<(), MessagingError> {
        self.stop_listening_to_agents(application).await?;
        self.client.delete_server_artifacts(application).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{backend_configuration, RecordingFactory};

    #[tokio::test]
    async fn test_commands_target_the_agent_context() {
        let registry = Arc::new(FactoryRegistry::new());
        let factory = Arc::new(RecordingFactory::new("recording"));
        registry.register(factory.clone()).await;

        let dm = DmClient::new(registry, "d");
        dm.switch_backend(backend_configuration("recording"))
            .await
            .unwrap();
        dm.client().adopt_pending_client().await;

        dm.send_to_agent("app", "/vm", &Message::SendInstances)
            .await
            .unwrap();

        let recorded = factory.last_client().unwrap();
        assert_eq!(
            recorded.published_to(&MessagingContext::for_agent("d", "app", "/vm")),
            vec![Message::SendInstances]
        );
    }

    #[tokio::test]
    async fn test_listening_per_application() {
        let registry = Arc::new(FactoryRegistry::new());
        let factory = Arc::new(RecordingFactory::new("recording"));
        registry.register(factory.clone()).await;

        let dm = DmClient::new(registry, "d");
        dm.switch_backend(backend_configuration("recording"))
            .await
            .unwrap();
        dm.client().adopt_pending_client().await;

        dm.listen_to_agents("app1").await.unwrap();
        dm.listen_to_agents("app2").await.unwrap();
        dm.delete_application_artifacts("app1").await.unwrap();

        let subscriptions = factory.last_client().unwrap().subscriptions();
        assert_eq!(subscriptions.len(), 1);
        assert!(subscriptions.contains(&MessagingContext::for_dm("d", "app2")));
        assert_eq!(dm.client().subscriptions(), subscriptions);
    }
}
