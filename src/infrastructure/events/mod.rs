//! Event delivery adapters.

mod channel_sender;

pub use channel_sender::{ChannelEventSender, Delivery};
