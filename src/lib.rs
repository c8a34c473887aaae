//! Chatflow - a chat subscription and state engine.
//!
//! This crate keeps per-chat message collections ordered by dense
//! lexicographic keys, maintains unread and mention counters, and fans
//! out change events to subscribers through per-chat managers.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the repository and subscription services.
pub mod application;
/// Domain layer containing entities, events, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for storage and delivery.
pub mod infrastructure;

/// Current version of the engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "chatflow";
