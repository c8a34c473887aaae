//! Read-state strategies for the two unread counters.
//!
//! Each [`CounterType`] carries its own notion of which messages count as
//! unread, which flag a read operation flips, and which messages the
//! counter covers at all.

use serde_json::{Value, json};

use crate::domain::entities::{CounterType, HAS_MENTION_KEY, MENTION_READ_KEY, READ_KEY};
use crate::domain::errors::StoreError;
use crate::domain::ports::Filter;

impl CounterType {
    /// Filter matching messages this counter treats as unread. A missing
    /// flag counts as unread.
    #[must_use]
    pub fn unread_filter(self) -> Filter {
        match self {
            Self::Message => Filter::not(Filter::eq([READ_KEY], json!(true))),
            Self::Mention => Filter::And(vec![
                Filter::eq([HAS_MENTION_KEY], json!(true)),
                Filter::not(Filter::eq([MENTION_READ_KEY], json!(true))),
            ]),
        }
    }

    /// Filter restricting a query to the messages this counter covers,
    /// or `None` when it covers all of them.
    #[must_use]
    pub fn messages_filter(self) -> Option<Filter> {
        match self {
            Self::Message => None,
            Self::Mention => Some(Filter::eq([HAS_MENTION_KEY], json!(true))),
        }
    }

    /// Document key of the flag this counter reads and writes.
    #[must_use]
    pub const fn read_key(self) -> &'static str {
        match self {
            Self::Message => READ_KEY,
            Self::Mention => MENTION_READ_KEY,
        }
    }

    /// Modifier flipping the counter's read flag to `value`. Reports no
    /// change when the flag already holds `value`, or when the mention
    /// counter does not cover the message.
    pub fn read_modifier(self, value: bool) -> impl FnMut(&mut Value) -> Result<bool, StoreError> {
        move |doc| {
            if self == Self::Mention
                && !doc
                    .get(HAS_MENTION_KEY)
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            {
                return Ok(false);
            }
            let key = self.read_key();
            let current = doc.get(key).and_then(Value::as_bool).unwrap_or(false);
            if current == value {
                return Ok(false);
            }
            doc[key] = json!(value);
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(json!({ "id": "a" }), true; "missing read flag is unread")]
    #[test_case(json!({ "id": "a", "read": false }), true; "explicit false is unread")]
    #[test_case(json!({ "id": "a", "read": true }), false; "read message is not unread")]
    fn test_message_unread_filter(doc: Value, unread: bool) {
        assert_eq!(CounterType::Message.unread_filter().matches(&doc), unread);
    }

    #[test_case(json!({ "hasMention": true }), true; "mention without flag is unread")]
    #[test_case(json!({ "hasMention": true, "mentionRead": false }), true; "unread mention")]
    #[test_case(json!({ "hasMention": true, "mentionRead": true }), false; "read mention")]
    #[test_case(json!({ "mentionRead": false }), false; "no mention at all")]
    fn test_mention_unread_filter(doc: Value, unread: bool) {
        assert_eq!(CounterType::Mention.unread_filter().matches(&doc), unread);
    }

    #[test]
    fn test_messages_filter_scopes_only_mentions() {
        assert!(CounterType::Message.messages_filter().is_none());
        let filter = CounterType::Mention.messages_filter().unwrap();
        assert!(filter.matches(&json!({ "hasMention": true })));
        assert!(!filter.matches(&json!({ "id": "a" })));
    }

    #[test]
    fn test_read_modifier_is_idempotent() {
        let mut modifier = CounterType::Message.read_modifier(true);
        let mut doc = json!({ "id": "a" });
        assert!(modifier(&mut doc).unwrap());
        assert_eq!(doc["read"], json!(true));
        assert!(!modifier(&mut doc).unwrap());
    }

    #[test]
    fn test_mention_modifier_skips_messages_without_mention() {
        let mut modifier = CounterType::Mention.read_modifier(true);
        let mut doc = json!({ "id": "a" });
        assert!(!modifier(&mut doc).unwrap());
        assert!(doc.get(MENTION_READ_KEY).is_none());

        let mut mentioned = json!({ "id": "b", "hasMention": true });
        assert!(modifier(&mut mentioned).unwrap());
        assert_eq!(mentioned[MENTION_READ_KEY], json!(true));
    }
}
