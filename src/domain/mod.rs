//! Core domain model: entities, events, errors, ports and services.

pub mod entities;
pub mod errors;
pub mod event;
pub mod ports;
pub mod services;
