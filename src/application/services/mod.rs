//! Application services.

pub mod identity_cache;
pub mod message_window;
pub mod read_handler;
pub mod repository;
pub mod subscription_manager;
pub mod subscription_service;


pub use identity_cache::IdentityCache;
pub use message_window::{EventsBuffer, MessageWindow};
pub use repository::{ChatRepository, GetMessagesRequest, RepositoryService};
pub use subscription_manager::{ManagerGuard, SubscriptionManager};
pub use subscription_service::{
    ChatSubscriptionService, SubscribeLastMessagesRequest, SubscribeLastMessagesResponse,
};
