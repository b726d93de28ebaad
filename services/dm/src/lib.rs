//! # Deployment manager
//!
//! Tracks the applications of one domain and the status of their root
//! instances, and talks to their agents through the `messaging` crate.
//!
//! Two periodic tasks run next to the message processor:
//!
//! - the messages checker delivers commands deferred while an agent was not
//!   ready, in order, and keeps them when a send fails;
//! - the heartbeats checker marks deployed root instances whose agent went
//!   silent as having a problem.

pub mod application;
pub mod awaiting;
pub mod checker_heartbeats;
pub mod checker_messages;
pub mod config;
pub mod error;
pub mod handler;
pub mod heartbeats;
pub mod manager;
pub mod readiness;
pub mod scheduler;

pub use application::{ApplicationRegistry, ManagedApplication, RootInstance};
pub use awaiting::AwaitingMessages;
pub use checker_heartbeats::{CheckerHeartbeatsTask, SuspectedInstance};
pub use checker_messages::{CheckerMessagesTask, FlushReport};
pub use config::DmConfig;
pub use error::{DmError, Result};
pub use handler::DmMessageHandler;
pub use heartbeats::{HeartbeatRecord, HeartbeatRecords, Liveness};
pub use manager::{bootstrap, DeploymentManager};
pub use readiness::{InstanceReadiness, StartedInstanceReadiness};
pub use scheduler::{PeriodicTask, Scheduler};
