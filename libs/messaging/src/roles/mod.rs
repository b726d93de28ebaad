//! Role-specific views over [`ReconfigurableClient`](crate::ReconfigurableClient)

mod agent;
mod dm;

pub use agent::AgentClient;
pub use dm::DmClient;
