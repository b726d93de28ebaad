//! Pluggable backend seams
//!
//! A [`ClientFactory`] is a messaging backend: it has a stable type name,
//! validates its own configuration and builds [`MessagingClient`]s bound to
//! an owner identity and that owner's inbound queue. Factories are
//! registered explicitly at startup in a
//! [`FactoryRegistry`](crate::FactoryRegistry).

use crate::{ClientIdentity, InboundQueue, MessagingClient, MessagingError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Configuration key naming the backend type to switch to
pub const MESSAGING_TYPE_PROPERTY: &str = "messaging.type";

/// Flat provider configuration, as supplied by configuration loading
pub type BackendConfiguration = HashMap<String, String>;

pub trait ClientFactory: Send + Sync + Debug {
    /// Stable type name used in configuration
    fn type_name(&self) -> &str;

    /// Apply provider-specific settings
    ///
    /// Returns `false` when the map is not valid for this provider. Never
    /// fails otherwise; the caller decides whether to abort.
    fn apply_configuration(&self, configuration: &BackendConfiguration) -> bool;

    /// Build a client for `identity` that delivers inbound traffic to `queue`
    ///
    /// The returned client is not connected yet.
    fn create_client(
        &self,
        identity: ClientIdentity,
        queue: Arc<InboundQueue>,
    ) -> Arc<dyn MessagingClient>;
}

/// Observer of backend availability
#[async_trait]
pub trait FactoryListener: Send + Sync {
    async fn factory_added(&self, factory: Arc<dyn ClientFactory>) -> Result<(), MessagingError>;

    async fn factory_removed(&self, factory: Arc<dyn ClientFactory>)
        -> Result<(), MessagingError>;
}
