use crate::application::ManagedApplication;
use async_trait::async_trait;

/// Decides whether the agent of a root instance can receive commands
#[async_trait]
pub trait InstanceReadiness: Send + Sync {
    async fn is_ready(&self, application: &ManagedApplication, root_instance: &str) -> bool;
}

/// Ready means the root instance is deployed and started
#[derive(Debug, Default, Clone, Copy)]
pub struct StartedInstanceReadiness;

#[async_trait]
impl InstanceReadiness for StartedInstanceReadiness {
    async fn is_ready(&self, application: &ManagedApplication, root_instance: &str) -> bool {
        application
            .status(root_instance)
            .is_some_and(|status| status.is_agent_ready())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::RootInstance;
    use messaging::InstanceStatus;

    #[tokio::test]
    async fn test_only_started_instances_are_ready() {
        let app = ManagedApplication::new("shop");
        app.add_root_instance(RootInstance::new("/vm", "vm"));
        let readiness = StartedInstanceReadiness;

        assert!(!readiness.is_ready(&app, "/vm").await);
        app.set_status("/vm", InstanceStatus::Deploying);
        assert!(!readiness.is_ready(&app, "/vm").await);
        app.set_status("/vm", InstanceStatus::DeployedStarted);
        assert!(readiness.is_ready(&app, "/vm").await);
        assert!(!readiness.is_ready(&app, "/unknown").await);
    }
}
