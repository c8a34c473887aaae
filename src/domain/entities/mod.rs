//! Domain entities.

mod chat_state;
mod details;
mod message;

pub use chat_state::{ChatState, CounterType, UnreadState};
pub use details::Details;
pub use message::{
    Attachment, AttachmentKind, CONTENT_KEY, CREATED_AT_KEY, CREATOR_KEY, HAS_MENTION_KEY, ID_KEY,
    MENTION_READ_KEY, MODIFIED_AT_KEY, Mark, MarkKind, MarkRange, Message, MessageContent,
    MessagesGetter, ORDER_KEY, REACTIONS_KEY, READ_KEY, REPLY_TO_KEY, Reactions, STATE_ID_KEY,
    SYNCED_KEY, TextStyle, extract_identity, participant_id,
};
