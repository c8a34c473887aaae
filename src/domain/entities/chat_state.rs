//! Per-chat unread accounting state.

use serde::{Deserialize, Serialize};

/// Which unread counter an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterType {
    /// Plain unread messages.
    Message,
    /// Unread messages that mention the current user.
    Mention,
}

/// One unread counter with the order id of its oldest unread message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadState {
    /// Order id of the oldest unread message, empty when the counter is zero.
    pub oldest_order_id: String,
    /// Number of unread messages, never negative.
    pub counter: i32,
}

/// Aggregate chat state delivered to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatState {
    /// Unread accounting for all messages.
    pub messages: UnreadState,
    /// Unread accounting for mentions of the current user.
    pub mentions: UnreadState,
    /// Maximum state id across all messages in the chat.
    pub last_state_id: String,
}

impl ChatState {
    /// Mutable access to the counter addressed by `counter_type`.
    pub fn by_type_mut(&mut self, counter_type: CounterType) -> &mut UnreadState {
        match counter_type {
            CounterType::Message => &mut self.messages,
            CounterType::Mention => &mut self.mentions,
        }
    }

    /// Read access to the counter addressed by `counter_type`.
    #[must_use]
    pub const fn by_type(&self, counter_type: CounterType) -> &UnreadState {
        match counter_type {
            CounterType::Message => &self.messages,
            CounterType::Mention => &self.mentions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_type_addresses_the_right_counter() {
        let mut state = ChatState::default();
        state.by_type_mut(CounterType::Message).counter = 3;
        state.by_type_mut(CounterType::Mention).counter = 1;
        assert_eq!(state.messages.counter, 3);
        assert_eq!(state.mentions.counter, 1);
        assert_eq!(state.by_type(CounterType::Mention).counter, 1);
    }

    #[test]
    fn test_default_state_is_empty() {
        let state = ChatState::default();
        assert_eq!(state.messages.counter, 0);
        assert!(state.messages.oldest_order_id.is_empty());
        assert!(state.last_state_id.is_empty());
    }
}
