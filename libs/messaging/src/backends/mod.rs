//! Built-in backends
//!
//! - [`DismissClient`]: stands in while no backend is available
//! - [`InMemoryFactory`]: in-process transport sharing one [`InMemoryBroker`]

mod dismiss;
mod in_memory;

pub use dismiss::{DismissClient, DISMISS_TYPE};
pub use in_memory::{
    InMemoryBroker, InMemoryClient, InMemoryFactory, IN_MEMORY_NAME_PROPERTY, IN_MEMORY_TYPE,
};
