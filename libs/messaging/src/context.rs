//! Routing model: who a message is for, and who a client is
//!
//! A [`MessagingContext`] scopes publish/subscribe traffic to a recipient
//! kind, a domain, an application and optionally a scoped (root) instance.
//! Contexts are plain values: two contexts are equal iff all four fields
//! are equal, which makes them usable both as subscription keys and as
//! publish targets.
//!
//! A [`ClientIdentity`] describes the owner of a client. Its [`OwnerId`] is
//! derived from the same four properties and is recomputed whenever one of
//! them changes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the deployment a context addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    /// The deployment manager
    ControlPlane,
    /// The agents of an application
    Agents,
}

impl RecipientKind {
    pub fn name(self) -> &'static str {
        match self {
            RecipientKind::ControlPlane => "dm",
            RecipientKind::Agents => "agent",
        }
    }
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Addressing key for publish and subscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagingContext {
    pub kind: RecipientKind,
    pub domain: String,
    pub application: String,
    pub scoped_instance_path: Option<String>,
}

impl MessagingContext {
    pub fn new(
        kind: RecipientKind,
        domain: impl Into<String>,
        application: impl Into<String>,
        scoped_instance_path: Option<String>,
    ) -> Self {
        Self {
            kind,
            domain: domain.into(),
            application: application.into(),
            scoped_instance_path,
        }
    }

    /// Context the DM listens on for notifications of an application
    pub fn for_dm(domain: impl Into<String>, application: impl Into<String>) -> Self {
        Self::new(RecipientKind::ControlPlane, domain, application, None)
    }

    /// Context of the agent managing a root instance
    pub fn for_agent(
        domain: impl Into<String>,
        application: impl Into<String>,
        root_instance_path: impl Into<String>,
    ) -> Self {
        Self::new(
            RecipientKind::Agents,
            domain,
            application,
            Some(root_instance_path.into()),
        )
    }

    /// Check if this context belongs to the given application
    pub fn belongs_to(&self, domain: &str, application: &str) -> bool {
        self.domain == domain && self.application == application
    }
}

impl fmt::Display for MessagingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.domain, self.application)?;
        if let Some(path) = &self.scoped_instance_path {
            write!(f, "{}", path)?;
        }
        Ok(())
    }
}

/// Derived identity string keying subscriptions and inbound queues
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Derive the owner id of an identity tuple
    pub fn derive(
        kind: RecipientKind,
        domain: &str,
        application: Option<&str>,
        scoped_instance_path: Option<&str>,
    ) -> Self {
        Self(format!(
            "{}@{}[{}]{}",
            kind,
            domain,
            application.unwrap_or_default(),
            scoped_instance_path.unwrap_or_default()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity-defining properties of a client owner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub kind: RecipientKind,
    pub domain: String,
    pub application: Option<String>,
    pub scoped_instance_path: Option<String>,
}

impl ClientIdentity {
    /// Identity of the deployment manager of a domain
    pub fn control_plane(domain: impl Into<String>) -> Self {
        Self {
            kind: RecipientKind::ControlPlane,
            domain: domain.into(),
            application: None,
            scoped_instance_path: None,
        }
    }

    /// Identity of the agent of a root instance
    pub fn agent(
        domain: impl Into<String>,
        application: impl Into<String>,
        scoped_instance_path: impl Into<String>,
    ) -> Self {
        Self {
            kind: RecipientKind::Agents,
            domain: domain.into(),
            application: Some(application.into()),
            scoped_instance_path: Some(scoped_instance_path.into()),
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        OwnerId::derive(
            self.kind,
            &self.domain,
            self.application.as_deref(),
            self.scoped_instance_path.as_deref(),
        )
    }

    /// Context this owner receives its own traffic on, when it has one
    pub fn own_context(&self) -> Option<MessagingContext> {
        match (self.kind, &self.application, &self.scoped_instance_path) {
            (RecipientKind::Agents, Some(app), Some(path)) => Some(MessagingContext::for_agent(
                self.domain.clone(),
                app.clone(),
                path.clone(),
            )),
            _ => None,
        }
    }
}
