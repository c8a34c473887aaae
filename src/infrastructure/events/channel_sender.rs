//! Broadcast-channel event sender.

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::errors::ChatError;
use crate::domain::event::Event;
use crate::domain::ports::EventSender;

/// A delivered event together with its routing decision.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// For every session.
    Broadcast(Event),
    /// For every session except the excluded one.
    ToOtherSessions {
        /// Session that already received the event synchronously.
        excluded_session_id: String,
        /// The event itself.
        event: Event,
    },
}

/// [`EventSender`] fanning events out over a tokio broadcast channel.
/// Each connected client task holds a receiver and applies the routing
/// decision against its own session id.
#[derive(Debug)]
pub struct ChannelEventSender {
    tx: broadcast::Sender<Delivery>,
}

impl ChannelEventSender {
    /// Creates a sender with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.tx.subscribe()
    }

    fn send(&self, delivery: Delivery) {
        if self.tx.send(delivery).is_err() {
            let err = ChatError::transport("no receivers connected");
            debug!(error = %err, recoverable = err.is_recoverable(), "event dropped");
        }
    }
}

impl EventSender for ChannelEventSender {
    fn broadcast(&self, event: Event) {
        self.send(Delivery::Broadcast(event));
    }

    fn broadcast_to_other_sessions(&self, session_id: &str, event: Event) {
        self.send(Delivery::ToOtherSessions {
            excluded_session_id: session_id.to_owned(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_reaches_subscribed_receiver() {
        let sender = ChannelEventSender::new(8);
        let mut rx = sender.subscribe();
        sender.broadcast(Event {
            context_id: "chat1".to_owned(),
            messages: Vec::new(),
        });
        match rx.try_recv().unwrap() {
            Delivery::Broadcast(event) => assert_eq!(event.context_id, "chat1"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[test]
    fn test_send_without_receivers_does_not_panic() {
        let sender = ChannelEventSender::new(8);
        sender.broadcast_to_other_sessions(
            "session1",
            Event {
                context_id: "chat1".to_owned(),
                messages: Vec::new(),
            },
        );
    }
}
