//! Application layer: services composing the domain model over the ports.

pub mod services;
