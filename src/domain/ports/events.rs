//! Outbound event delivery contract.

use crate::domain::event::Event;

/// Pushes event envelopes to connected clients.
pub trait EventSender: Send + Sync {
    /// Delivers an event to every session.
    fn broadcast(&self, event: Event);

    /// Delivers an event to every session except the named one, which has
    /// already received the payloads synchronously.
    fn broadcast_to_other_sessions(&self, session_id: &str, event: Event);
}
