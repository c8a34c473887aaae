//! Event envelope and payload union delivered to subscribers.

use crate::domain::entities::{ChatState, Details, Message, Reactions};

/// Envelope carrying a batch of event messages for one chat object.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Chat object id the batch belongs to.
    pub context_id: String,
    /// Ordered event payloads.
    pub messages: Vec<EventMessage>,
}

/// A single event payload tagged with its space.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    /// Space the chat object lives in.
    pub space_id: String,
    /// The payload itself.
    pub payload: EventPayload,
}

/// Everything the engine can tell a subscriber about a chat.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// A new message appeared.
    ChatAdd(ChatAddEvent),
    /// An existing message body changed.
    ChatUpdate(ChatUpdateEvent),
    /// The reactions of a message changed.
    ChatUpdateReactions(ChatUpdateReactionsEvent),
    /// A message was deleted.
    ChatDelete(ChatDeleteEvent),
    /// Read flags of some messages changed.
    ChatUpdateMessageReadStatus(ReadStatusEvent),
    /// Mention-read flags of some messages changed.
    ChatUpdateMentionReadStatus(ReadStatusEvent),
    /// Sync flags of some messages changed.
    ChatUpdateMessageSyncStatus(SyncStatusEvent),
    /// The aggregate chat state changed. Always last in an envelope.
    ChatStateUpdate(ChatStateUpdateEvent),
}

impl EventPayload {
    /// Subscription ids the payload targets.
    #[must_use]
    pub fn sub_ids(&self) -> &[String] {
        match self {
            Self::ChatAdd(ev) => &ev.sub_ids,
            Self::ChatUpdate(ev) => &ev.sub_ids,
            Self::ChatUpdateReactions(ev) => &ev.sub_ids,
            Self::ChatDelete(ev) => &ev.sub_ids,
            Self::ChatUpdateMessageReadStatus(ev) | Self::ChatUpdateMentionReadStatus(ev) => {
                &ev.sub_ids
            }
            Self::ChatUpdateMessageSyncStatus(ev) => &ev.sub_ids,
            Self::ChatStateUpdate(ev) => &ev.sub_ids,
        }
    }
}

/// Payload of [`EventPayload::ChatAdd`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ChatAddEvent {
    pub id: String,
    pub order_id: String,
    /// Order id of the preceding message, empty for the head of the chat.
    pub after_order_id: String,
    pub message: Message,
    pub sub_ids: Vec<String>,
    /// Details of the creator and attachment targets, filled only for
    /// subscriptions that asked for dependencies.
    pub dependencies: Vec<Details>,
}

/// Payload of [`EventPayload::ChatUpdate`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ChatUpdateEvent {
    pub id: String,
    pub message: Message,
    pub sub_ids: Vec<String>,
}

/// Payload of [`EventPayload::ChatUpdateReactions`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ChatUpdateReactionsEvent {
    pub id: String,
    pub reactions: Reactions,
    pub sub_ids: Vec<String>,
}

/// Payload of [`EventPayload::ChatDelete`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ChatDeleteEvent {
    pub id: String,
    pub sub_ids: Vec<String>,
}

/// Payload of the message and mention read-status events.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ReadStatusEvent {
    pub ids: Vec<String>,
    pub is_read: bool,
    pub sub_ids: Vec<String>,
}

/// Payload of [`EventPayload::ChatUpdateMessageSyncStatus`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct SyncStatusEvent {
    pub ids: Vec<String>,
    pub is_synced: bool,
    pub sub_ids: Vec<String>,
}

/// Payload of [`EventPayload::ChatStateUpdate`].
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct ChatStateUpdateEvent {
    pub state: ChatState,
    pub sub_ids: Vec<String>,
}
