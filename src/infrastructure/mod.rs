//! Adapters implementing the domain ports.

pub mod events;
pub mod store;
