//! # Messaging
//!
//! Transport-agnostic messaging between a deployment manager (DM) and the
//! agents of the applications it manages.
//!
//! ## Architecture
//!
//! ```text
//!   FactoryRegistry ──lookup──> ClientFactory ──create──> MessagingClient
//!          │                                                  ▲
//!          └──notify──> ReconfigurableClient ──current/pending┘
//!                              │        ▲
//!                      InboundQueue     │ adopt pending
//!                              └──> MessageProcessor ──> MessageHandler
//! ```
//!
//! - Backends plug in through [`ClientFactory`] and are registered
//!   explicitly in a [`FactoryRegistry`] at startup.
//! - A [`ReconfigurableClient`] owns the owner identity, the inbound queue
//!   and the subscribed contexts, and can switch backend at runtime.
//! - A [`MessageProcessor`] drains the queue into a role-specific
//!   [`MessageHandler`] and is the only place a backend switch takes effect.
//!
//! [`DmClient`] and [`AgentClient`] give each side its own addressing.

pub mod backends;
mod client;
mod context;
mod error;
pub mod factory;
mod heartbeat;
mod message;
mod metrics;
mod processor;
mod queue;
mod reconfigurable;
mod registry;
mod roles;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::MessagingClient;
pub use context::{ClientIdentity, MessagingContext, OwnerId, RecipientKind};
pub use error::{MessagingError, TransportError};
pub use factory::{BackendConfiguration, ClientFactory, FactoryListener, MESSAGING_TYPE_PROPERTY};
pub use heartbeat::{HeartbeatEmitter, HeartbeatHandle, DEFAULT_HEARTBEAT_PERIOD};
pub use message::{ExportedVariables, InstanceStatus, Message};
pub use metrics::{MessagingMetrics, MetricsSnapshot};
pub use processor::{MessageHandler, MessageProcessor, ProcessorHandle, DEFAULT_POLL_INTERVAL};
pub use queue::InboundQueue;
pub use reconfigurable::ReconfigurableClient;
pub use registry::FactoryRegistry;
pub use roles::{AgentClient, DmClient};
