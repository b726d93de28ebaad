//! Messages exchanged between the deployment manager and its agents
//!
//! A [`Message`] is a closed set of commands (DM to agent) and notifications
//! (agent to DM). Values are immutable once built; each variant only carries
//! the payload its kind needs. Serialization belongs to the backends, so the
//! type derives serde but no wire format is fixed here.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Exported variables of an instance, ordered by name
pub type ExportedVariables = BTreeMap<String, String>;

/// Lifecycle state of an instance as seen by the messaging layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    NotDeployed,
    Deploying,
    DeployedStopped,
    DeployedStarted,
    Undeploying,
    Problem,
}

impl InstanceStatus {
    /// Only a started root instance has an agent able to receive commands
    pub fn is_agent_ready(self) -> bool {
        matches!(self, InstanceStatus::DeployedStarted)
    }

    pub fn name(self) -> &'static str {
        match self {
            InstanceStatus::NotDeployed => "not_deployed",
            InstanceStatus::Deploying => "deploying",
            InstanceStatus::DeployedStopped => "deployed_stopped",
            InstanceStatus::DeployedStarted => "deployed_started",
            InstanceStatus::Undeploying => "undeploying",
            InstanceStatus::Problem => "problem",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed unit of communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    // Commands, DM to agent
    /// Hand a root instance (and its children) over to its agent
    SetScopedInstance {
        root_instance_path: String,
        component: String,
        exported_variables: ExportedVariables,
    },
    AddInstance {
        parent_instance_path: String,
        instance_name: String,
        component: String,
    },
    RemoveInstance {
        instance_path: String,
    },
    ChangeInstanceState {
        instance_path: String,
        new_state: InstanceStatus,
    },
    /// Ask an agent to republish its exports and re-request its imports
    Resynchronize,
    /// Ask an agent to send its instance model back
    SendInstances,

    // Notifications, agent to DM
    Heartbeat {
        application: String,
        root_instance_path: String,
        ip_address: Option<String>,
    },
    MachineUp {
        application: String,
        root_instance_path: String,
        ip_address: String,
    },
    MachineDown {
        application: String,
        root_instance_path: String,
    },
    InstanceChanged {
        application: String,
        instance_path: String,
        new_status: InstanceStatus,
    },
    InstanceRemoved {
        application: String,
        instance_path: String,
    },
}

impl Message {
    /// Stable kind name, used in logs and error reports
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SetScopedInstance { .. } => "set_scoped_instance",
            Message::AddInstance { .. } => "add_instance",
            Message::RemoveInstance { .. } => "remove_instance",
            Message::ChangeInstanceState { .. } => "change_instance_state",
            Message::Resynchronize => "resynchronize",
            Message::SendInstances => "send_instances",
            Message::Heartbeat { .. } => "heartbeat",
            Message::MachineUp { .. } => "machine_up",
            Message::MachineDown { .. } => "machine_down",
            Message::InstanceChanged { .. } => "instance_changed",
            Message::InstanceRemoved { .. } => "instance_removed",
        }
    }

    /// Check if this message is a command addressed to an agent
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Message::SetScopedInstance { .. }
                | Message::AddInstance { .. }
                | Message::RemoveInstance { .. }
                | Message::ChangeInstanceState { .. }
                | Message::Resynchronize
                | Message::SendInstances
        )
    }

    /// Check if this message is a notification addressed to the DM
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Message::Heartbeat { .. }
                | Message::MachineUp { .. }
                | Message::MachineDown { .. }
                | Message::InstanceChanged { .. }
                | Message::InstanceRemoved { .. }
        )
    }

    /// Application named by a notification, if the message carries one
    pub fn application(&self) -> Option<&str> {
        match self {
            Message::Heartbeat { application, .. }
            | Message::MachineUp { application, .. }
            | Message::MachineDown { application, .. }
            | Message::InstanceChanged { application, .. }
            | Message::InstanceRemoved { application, .. } => Some(application),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_started_is_agent_ready() {
        assert!(InstanceStatus::DeployedStarted.is_agent_ready());
        for status in [
            InstanceStatus::NotDeployed,
            InstanceStatus::Deploying,
            InstanceStatus::DeployedStopped,
            InstanceStatus::Undeploying,
            InstanceStatus::Problem,
        ] {
            assert!(!status.is_agent_ready(), "{} must not be ready", status);
        }
    }

    #[test]
    fn test_message_classification() {
        let cmd = Message::RemoveInstance {
            instance_path: "/vm/server".to_string(),
        };
        assert!(cmd.is_command());
        assert!(!cmd.is_notification());
        assert_eq!(cmd.kind(), "remove_instance");
        assert_eq!(cmd.application(), None);

        let notif = Message::MachineDown {
            application: "shop".to_string(),
            root_instance_path: "/vm".to_string(),
        };
        assert!(notif.is_notification());
        assert!(!notif.is_command());
        assert_eq!(notif.application(), Some("shop"));

        assert!(Message::Resynchronize.is_command());
        assert_eq!(Message::SendInstances.kind(), "send_instances");
    }

    #[test]
    fn test_kind_tag_matches_kind_name() {
        let message = Message::ChangeInstanceState {
            instance_path: "/vm/server".to_string(),
            new_state: InstanceStatus::DeployedStarted,
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], message.kind());
        assert_eq!(value["new_state"], "deployed_started");

        let value = serde_json::to_value(Message::Resynchronize).unwrap();
        assert_eq!(value, serde_json::json!({ "kind": "resynchronize" }));
    }
}
