//! Per-request session context contract.

use crate::domain::event::EventMessage;

/// Carrier for events that must reach the requesting session synchronously,
/// inside the response of the call that produced them.
pub trait SessionContext: Send + Sync {
    /// Session id, used to exclude this session from the broadcast.
    fn id(&self) -> &str;

    /// Events already accumulated for a chat in this request.
    fn get_messages(&self, chat_id: &str) -> Vec<EventMessage>;

    /// Replaces the accumulated events for a chat.
    fn set_messages(&self, chat_id: &str, messages: Vec<EventMessage>);
}
