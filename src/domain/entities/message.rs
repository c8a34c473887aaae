//! Chat message entity, validation and the schemaless-value codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::domain::errors::ChatError;

/// Stable document key for the message id.
pub const ID_KEY: &str = "id";
/// Stable document key for the message creator identity.
pub const CREATOR_KEY: &str = "creator";
/// Stable document key for the creation timestamp.
pub const CREATED_AT_KEY: &str = "createdAt";
/// Stable document key for the modification timestamp.
pub const MODIFIED_AT_KEY: &str = "modifiedAt";
/// Stable document key for the replied-to message id.
pub const REPLY_TO_KEY: &str = "replyToMessageId";
/// Stable document key for the content subtree.
pub const CONTENT_KEY: &str = "content";
/// Stable document key for the reactions map.
pub const REACTIONS_KEY: &str = "reactions";
/// Stable document key for the message read flag.
pub const READ_KEY: &str = "read";
/// Stable document key for the mention read flag.
pub const MENTION_READ_KEY: &str = "mentionRead";
/// Stable document key for the mention presence flag.
pub const HAS_MENTION_KEY: &str = "hasMention";
/// Stable document key for the publish state id.
pub const STATE_ID_KEY: &str = "stateId";
/// Stable document key for the order subtree (`{"id": <order id>}`).
pub const ORDER_KEY: &str = "_o";
/// Stable document key for the synced flag.
pub const SYNCED_KEY: &str = "synced";

/// Text style of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TextStyle {
    #[default]
    Paragraph = 0,
    Header1 = 1,
    Header2 = 2,
    Header3 = 3,
    Quote = 4,
    Code = 5,
    Callout = 6,
}

impl From<u8> for TextStyle {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Header1,
            2 => Self::Header2,
            3 => Self::Header3,
            4 => Self::Quote,
            5 => Self::Code,
            6 => Self::Callout,
            _ => Self::Paragraph,
        }
    }
}

/// Kind of an inline text mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum MarkKind {
    #[default]
    Strikethrough = 0,
    Keyboard = 1,
    Italic = 2,
    Bold = 3,
    Underscored = 4,
    Link = 5,
    TextColor = 6,
    BackgroundColor = 7,
    Mention = 8,
    Emoji = 9,
    Object = 10,
}

impl From<u8> for MarkKind {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Keyboard,
            2 => Self::Italic,
            3 => Self::Bold,
            4 => Self::Underscored,
            5 => Self::Link,
            6 => Self::TextColor,
            7 => Self::BackgroundColor,
            8 => Self::Mention,
            9 => Self::Emoji,
            10 => Self::Object,
            _ => Self::Strikethrough,
        }
    }
}

/// Half-open position range inside the message text, measured in UTF-16
/// code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[allow(missing_docs)]
pub struct MarkRange {
    pub from: u32,
    pub to: u32,
}

/// Inline mark applied to a range of the message text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[allow(missing_docs)]
pub struct Mark {
    pub range: MarkRange,
    pub kind: MarkKind,
    /// Mark payload: a participant id for mentions, a URL for links.
    pub param: String,
}

impl Mark {
    /// Creates a mark covering `[from, to)` of the given kind.
    #[must_use]
    pub fn new(from: u32, to: u32, kind: MarkKind) -> Self {
        Self {
            range: MarkRange { from, to },
            kind,
            param: String::new(),
        }
    }

    /// Sets the mark parameter.
    #[must_use]
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }
}

/// Text payload of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[allow(missing_docs)]
pub struct MessageContent {
    pub text: String,
    pub style: TextStyle,
    pub marks: Vec<Mark>,
}

/// Kind of a message attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AttachmentKind {
    #[default]
    File = 0,
    Image = 1,
    Link = 2,
}

impl TryFrom<u8> for AttachmentKind {
    type Error = ChatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::File),
            1 => Ok(Self::Image),
            2 => Ok(Self::Link),
            other => Err(ChatError::invalid(format!(
                "unknown attachment type: {other}"
            ))),
        }
    }
}

/// Attachment referencing another object by its target id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Attachment {
    pub target: String,
    pub kind: AttachmentKind,
}

impl Attachment {
    /// Creates an attachment for the given target object.
    #[must_use]
    pub fn new(target: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }
}

/// Reactions map: emoji to the identities that reacted with it.
///
/// Empty identity lists must never be present; the codec drops them.
pub type Reactions = BTreeMap<String, Vec<String>>;

/// A lookup source for messages by id, used by mention helpers.
pub trait MessagesGetter {
    /// Fetches messages by id, silently skipping missing ones.
    fn get_messages_by_ids(&self, ids: &[String]) -> Result<Vec<Message>, ChatError>;
}

/// Chat message entity as persisted in the per-chat collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct Message {
    pub id: String,
    pub creator: String,
    pub created_at: i64,
    pub modified_at: i64,
    /// Empty when the message is not a reply.
    pub reply_to_message_id: String,
    pub content: MessageContent,
    pub attachments: Vec<Attachment>,
    pub reactions: Reactions,
    pub read: bool,
    pub mention_read: bool,
    pub has_mention: bool,
    pub synced: bool,
    /// Monotone per-chat publish tag; the maximum across all messages is
    /// the chat's last state.
    pub state_id: String,
    /// Dense lexicographic order key; compared bytewise only.
    pub order_id: String,
}

#[allow(missing_docs)]
impl Message {
    #[must_use]
    pub fn new(id: impl Into<String>, creator: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            creator: creator.into(),
            content: MessageContent {
                text: text.into(),
                ..MessageContent::default()
            },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = order_id.into();
        self
    }

    #[must_use]
    pub fn with_state_id(mut self, state_id: impl Into<String>) -> Self {
        self.state_id = state_id.into();
        self
    }

    #[must_use]
    pub fn with_marks(mut self, marks: Vec<Mark>) -> Self {
        self.content.marks = marks;
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_message_id = message_id.into();
        self
    }

    /// Length of the message text in UTF-16 code units, the unit mark
    /// ranges are measured in.
    #[must_use]
    pub fn text_len_utf16(&self) -> u32 {
        u32::try_from(self.content.text.encode_utf16().count()).unwrap_or(u32::MAX)
    }

    /// Validates mark ranges against the UTF-16 text length and attachment
    /// targets. Other fields are free-form.
    pub fn validate(&self) -> Result<(), ChatError> {
        let len = self.text_len_utf16();
        for mark in &self.content.marks {
            if mark.range.from > mark.range.to {
                return Err(ChatError::invalid("range.from is greater than range.to"));
            }
            if mark.range.from >= len {
                return Err(ChatError::invalid("range.from is out of text bounds"));
            }
            if mark.range.to > len {
                return Err(ChatError::invalid("range.to is out of text bounds"));
            }
        }
        for attachment in &self.attachments {
            if attachment.target.is_empty() {
                return Err(ChatError::invalid("attachment target is empty"));
            }
        }
        Ok(())
    }

    /// Identities of all mention marks, plus the creator of the replied-to
    /// message if there is one.
    pub fn mention_identities(&self, repo: &dyn MessagesGetter) -> Result<Vec<String>, ChatError> {
        let mut mentions = Vec::new();
        for mark in &self.content.marks {
            if mark.kind == MarkKind::Mention {
                let identity = extract_identity(&mark.param);
                if !identity.is_empty() {
                    mentions.push(identity.to_owned());
                }
            }
        }
        if !self.reply_to_message_id.is_empty() {
            let msgs = repo.get_messages_by_ids(std::slice::from_ref(&self.reply_to_message_id))?;
            if let [replied] = msgs.as_slice() {
                mentions.push(replied.creator.clone());
            }
        }
        Ok(mentions)
    }

    /// Returns true when a mention mark targets `my_participant_id`, or the
    /// replied-to message was written by `my_identity`.
    pub fn is_current_user_mentioned(
        &self,
        my_participant_id: &str,
        my_identity: &str,
        repo: &dyn MessagesGetter,
    ) -> Result<bool, ChatError> {
        for mark in &self.content.marks {
            if mark.kind == MarkKind::Mention && mark.param == my_participant_id {
                return Ok(true);
            }
        }
        if !self.reply_to_message_id.is_empty() {
            let msgs = repo.get_messages_by_ids(std::slice::from_ref(&self.reply_to_message_id))?;
            if let [replied] = msgs.as_slice()
                && replied.creator == my_identity
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Marshals the message into the stable-key document form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let marks: Vec<Value> = self
            .content
            .marks
            .iter()
            .map(|mark| {
                let mut obj = Map::new();
                obj.insert("from".to_owned(), json!(mark.range.from));
                obj.insert("to".to_owned(), json!(mark.range.to));
                obj.insert("type".to_owned(), json!(mark.kind as u8));
                if !mark.param.is_empty() {
                    obj.insert("param".to_owned(), json!(mark.param));
                }
                Value::Object(obj)
            })
            .collect();

        let mut attachments = Map::new();
        for attachment in &self.attachments {
            if attachment.target.is_empty() {
                // caught earlier by validate()
                continue;
            }
            attachments.insert(
                attachment.target.clone(),
                json!({ "type": attachment.kind as u8 }),
            );
        }

        let mut reactions = Map::new();
        for (emoji, identities) in &self.reactions {
            if identities.is_empty() {
                continue;
            }
            reactions.insert(emoji.clone(), json!(identities));
        }

        json!({
            ID_KEY: self.id,
            CREATOR_KEY: self.creator,
            CREATED_AT_KEY: self.created_at,
            MODIFIED_AT_KEY: self.modified_at,
            REPLY_TO_KEY: self.reply_to_message_id,
            CONTENT_KEY: {
                "message": {
                    "text": self.content.text,
                    "style": self.content.style as u8,
                    "marks": marks,
                },
                "attachments": attachments,
            },
            REACTIONS_KEY: reactions,
            READ_KEY: self.read,
            MENTION_READ_KEY: self.mention_read,
            HAS_MENTION_KEY: self.has_mention,
            STATE_ID_KEY: self.state_id,
            ORDER_KEY: { "id": self.order_id },
            SYNCED_KEY: self.synced,
        })
    }

    /// Unmarshals a message from its document form.
    ///
    /// Missing fields take their defaults; attachments are normalized to
    /// target order; an unknown attachment type is rejected.
    pub fn from_value(value: &Value) -> Result<Self, ChatError> {
        let content_msg = lookup(value, &[CONTENT_KEY, "message"]);

        let mut marks = Vec::new();
        if let Some(Value::Array(raw_marks)) = content_msg.map(|c| &c["marks"]) {
            for raw in raw_marks {
                marks.push(Mark {
                    range: MarkRange {
                        from: get_u32(raw, "from"),
                        to: get_u32(raw, "to"),
                    },
                    kind: MarkKind::from(get_u8(raw, "type")),
                    param: get_str(raw, "param"),
                });
            }
        }

        let mut attachments = Vec::new();
        if let Some(Value::Object(raw_attachments)) = lookup(value, &[CONTENT_KEY, "attachments"]) {
            for (target, raw) in raw_attachments {
                attachments.push(Attachment {
                    target: target.clone(),
                    kind: AttachmentKind::try_from(get_u8(raw, "type"))?,
                });
            }
        }

        let mut reactions = Reactions::new();
        if let Some(Value::Object(raw_reactions)) = value.get(REACTIONS_KEY) {
            for (emoji, raw) in raw_reactions {
                let identities: Vec<String> = raw
                    .as_array()
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| id.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default();
                if !identities.is_empty() {
                    reactions.insert(emoji.clone(), identities);
                }
            }
        }

        Ok(Self {
            id: get_str(value, ID_KEY),
            creator: get_str(value, CREATOR_KEY),
            created_at: get_i64(value, CREATED_AT_KEY),
            modified_at: get_i64(value, MODIFIED_AT_KEY),
            reply_to_message_id: get_str(value, REPLY_TO_KEY),
            content: MessageContent {
                text: content_msg
                    .and_then(|c| c.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                style: TextStyle::from(
                    content_msg
                        .and_then(|c| c.get("style"))
                        .and_then(Value::as_u64)
                        .and_then(|n| u8::try_from(n).ok())
                        .unwrap_or_default(),
                ),
                marks,
            },
            attachments,
            reactions,
            read: get_bool(value, READ_KEY),
            mention_read: get_bool(value, MENTION_READ_KEY),
            has_mention: get_bool(value, HAS_MENTION_KEY),
            synced: get_bool(value, SYNCED_KEY),
            state_id: get_str(value, STATE_ID_KEY),
            order_id: lookup(value, &[ORDER_KEY, "id"])
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

/// Builds the participant id for an identity inside a space.
#[must_use]
pub fn participant_id(space_id: &str, identity: &str) -> String {
    format!("{space_id}_participant_{identity}")
}

/// Recovers the identity from a participant id (the part after the last
/// underscore).
#[must_use]
pub fn extract_identity(participant_id: &str) -> &str {
    participant_id
        .rsplit('_')
        .next()
        .unwrap_or(participant_id)
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn get_str(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn get_bool(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or_default()
}

fn get_i64(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn get_u32(value: &Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or_default()
}

fn get_u8(value: &Value, key: &str) -> u8 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u8::try_from(n).ok())
        .unwrap_or_default()
}
