//! Chat subscription entry points: subscribe, unsubscribe, read and
//! unread orchestration across the repository and the manager.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::application::services::identity_cache::IdentityCache;
use crate::application::services::message_window::{EventsBuffer, MessageWindow};
use crate::application::services::repository::RepositoryService;
use crate::application::services::subscription_manager::SubscriptionManager;
use crate::domain::entities::{ChatState, CounterType, Details, Message};
use crate::domain::errors::ChatError;
use crate::domain::ports::{AccountService, EventSender, SpaceIndex};

/// Parameters of [`ChatSubscriptionService::subscribe_last_messages`].
#[derive(Debug, Clone)]
pub struct SubscribeLastMessagesRequest {
    /// Chat object to subscribe to.
    pub chat_object_id: String,
    /// Subscription id, unique per subscriber.
    pub sub_id: String,
    /// How many tail messages to deliver.
    pub limit: usize,
    /// Deliver the initial messages as events instead of in the response.
    pub async_init: bool,
    /// Enrich add events with creator and attachment details.
    pub with_dependencies: bool,
}

/// Result of a synchronous subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeLastMessagesResponse {
    /// Tail messages, ascending by order id. Empty for async init.
    pub messages: Vec<Message>,
    /// Aggregate state at subscription time.
    pub chat_state: ChatState,
    /// Per-message dependency details, parallel to `messages`.
    pub dependencies: Vec<Vec<Details>>,
    /// Order id directly before the first returned message, for paging
    /// further back.
    pub previous_order_id: String,
}

/// Registry of per-chat subscription managers and the operations clients
/// call against them.
pub struct ChatSubscriptionService {
    repositories: Arc<RepositoryService>,
    space_index: Arc<dyn SpaceIndex>,
    event_sender: Arc<dyn EventSender>,
    account: Arc<dyn AccountService>,
    identity_cache: Arc<IdentityCache>,
    managers: Mutex<HashMap<String, Arc<SubscriptionManager>>>,
}

impl ChatSubscriptionService {
    /// Wires the service to its collaborators.
    #[must_use]
    pub fn new(
        repositories: Arc<RepositoryService>,
        space_index: Arc<dyn SpaceIndex>,
        event_sender: Arc<dyn EventSender>,
        account: Arc<dyn AccountService>,
    ) -> Self {
        Self {
            repositories,
            space_index,
            event_sender,
            account,
            identity_cache: Arc::new(IdentityCache::new()),
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// The manager for a chat, created lazily on first access with the
    /// state loaded from the repository.
    pub fn get_manager(
        &self,
        chat_object_id: &str,
    ) -> Result<Arc<SubscriptionManager>, ChatError> {
        let mut managers = self.managers.lock();
        if let Some(manager) = managers.get(chat_object_id) {
            return Ok(Arc::clone(manager));
        }
        let repository = Arc::new(self.repositories.repository(chat_object_id)?);
        let chat_state = repository.load_chat_state()?;
        let manager = Arc::new(SubscriptionManager::new(
            chat_object_id,
            self.account.current_identity(),
            chat_state,
            repository,
            Arc::clone(&self.space_index),
            Arc::clone(&self.event_sender),
            Arc::clone(&self.identity_cache),
        ));
        managers.insert(chat_object_id.to_owned(), Arc::clone(&manager));
        info!(chat_id = %chat_object_id, "chat subscription manager created");
        Ok(manager)
    }

    /// Subscribes to the tail of a chat. Synchronous init returns the
    /// messages in the response; async init replays them as add events
    /// through the regular delivery path instead.
    pub fn subscribe_last_messages(
        &self,
        request: &SubscribeLastMessagesRequest,
    ) -> Result<SubscribeLastMessagesResponse, ChatError> {
        let manager = self.get_manager(&request.chat_object_id)?;
        let repository = Arc::clone(manager.repository());
        let (messages, previous_order_id) =
            repository.get_last_messages_with_prev(request.limit)?;

        let mut guard = manager.lock();
        guard.subscribe(&request.sub_id, request.with_dependencies);
        let chat_state = guard.get_chat_state();

        if request.async_init {
            let mut window = MessageWindow::new(request.limit);
            let mut prev_order_id = previous_order_id;
            for message in messages {
                let order_id = message.order_id.clone();
                window.apply_add(message, prev_order_id, true);
                prev_order_id = order_id;
            }
            let mut buffer = EventsBuffer::new();
            window.append_events_to(&request.sub_id, &mut buffer);
            guard.push_buffered(buffer.build(manager.space_id()));
            guard.force_state_update();
            guard.flush();
            return Ok(SubscribeLastMessagesResponse {
                chat_state,
                ..SubscribeLastMessagesResponse::default()
            });
        }

        let dependencies = if request.with_dependencies {
            messages
                .iter()
                .map(|message| manager.collect_message_dependencies(message))
                .collect()
        } else {
            Vec::new()
        };
        Ok(SubscribeLastMessagesResponse {
            messages,
            chat_state,
            dependencies,
            previous_order_id,
        })
    }

    /// Drops a subscription. Unknown chats and subscription ids are fine.
    pub fn unsubscribe(&self, chat_object_id: &str, sub_id: &str) {
        let managers = self.managers.lock();
        if let Some(manager) = managers.get(chat_object_id) {
            manager.lock().unsubscribe(sub_id);
        }
    }

    /// Marks the unread messages in an order-id range as read, skipping
    /// messages published after `last_state_id`. Returns how many
    /// messages actually changed.
    pub fn mark_read_messages(
        &self,
        chat_object_id: &str,
        after_order_id: &str,
        before_order_id: &str,
        last_state_id: &str,
        counter_type: CounterType,
    ) -> Result<usize, ChatError> {
        let manager = self.get_manager(chat_object_id)?;
        let repository = manager.repository();
        let ids = repository.get_unread_message_ids_in_range(
            after_order_id,
            before_order_id,
            last_state_id,
            counter_type,
        )?;
        let modified = repository.set_read_flag(&ids, counter_type, true)?;
        let oldest_order_id = repository.get_oldest_order_id(counter_type)?;

        let mut guard = manager.lock();
        guard.read_messages(&oldest_order_id, &modified, counter_type);
        guard.flush();
        Ok(modified.len())
    }

    /// Marks the read messages at or after `after_order_id` as unread
    /// again, pinning the last state id the chat had at that moment.
    pub fn mark_unread_messages(
        &self,
        chat_object_id: &str,
        after_order_id: &str,
        counter_type: CounterType,
    ) -> Result<(), ChatError> {
        let manager = self.get_manager(chat_object_id)?;
        let repository = manager.repository();
        let ids = repository.get_read_messages_after(after_order_id, counter_type)?;
        let modified = repository.set_read_flag(&ids, counter_type, false)?;
        let oldest_order_id = repository.get_oldest_order_id(counter_type)?;
        let last_state_id = repository.get_last_state_id()?;

        let mut guard = manager.lock();
        guard.unread_messages(&oldest_order_id, &last_state_id, &modified, counter_type);
        guard.flush();
        Ok(())
    }

    /// Flips the synced flag on a batch of messages and notifies
    /// subscribers about the ones that changed.
    pub fn update_sync_status(
        &self,
        chat_object_id: &str,
        ids: &[String],
        is_synced: bool,
    ) -> Result<(), ChatError> {
        let manager = self.get_manager(chat_object_id)?;
        let modified = manager.repository().set_synced_flag(ids, is_synced)?;
        if modified.is_empty() {
            return Ok(());
        }
        let mut guard = manager.lock();
        guard.update_sync_status(modified, is_synced);
        guard.flush();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::Receiver;

    use super::*;
    use crate::domain::event::{Event, EventPayload};
    use crate::domain::ports::{MockAccountService, MockSpaceIdResolver, MockSpaceIndex};
    use crate::infrastructure::events::{ChannelEventSender, Delivery};
    use crate::infrastructure::store::MemStore;

    const CHAT_ID: &str = "chat1";

    fn setup(messages: &[Message]) -> (ChatSubscriptionService, Arc<ChannelEventSender>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let mut resolver = MockSpaceIdResolver::new();
        resolver
            .expect_resolve_space_id()
            .returning(|_| Ok("space1".to_owned()));
        let repositories = Arc::new(RepositoryService::new(
            Arc::new(MemStore::new()),
            Arc::new(resolver),
        ));
        let repository = repositories.repository(CHAT_ID).unwrap();
        for message in messages {
            repository.add_message(message).unwrap();
        }

        let mut index = MockSpaceIndex::new();
        index
            .expect_get_details()
            .returning(|id| Ok(Details::new(id)));
        let mut account = MockAccountService::new();
        account
            .expect_current_identity()
            .returning(|| "me".to_owned());

        let sender = Arc::new(ChannelEventSender::new(64));
        let service = ChatSubscriptionService::new(
            repositories,
            Arc::new(index),
            Arc::clone(&sender) as Arc<dyn crate::domain::ports::EventSender>,
            Arc::new(account),
        );
        (service, sender)
    }

    fn message(id: &str, order_id: &str, state_id: &str) -> Message {
        Message::new(id, "idA", "text")
            .with_order_id(order_id)
            .with_state_id(state_id)
    }

    fn subscribe_request(sub_id: &str, limit: usize) -> SubscribeLastMessagesRequest {
        SubscribeLastMessagesRequest {
            chat_object_id: CHAT_ID.to_owned(),
            sub_id: sub_id.to_owned(),
            limit,
            async_init: false,
            with_dependencies: false,
        }
    }

    fn next_broadcast(rx: &mut Receiver<Delivery>) -> Event {
        match rx.try_recv().unwrap() {
            Delivery::Broadcast(event) => event,
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[test]
    fn test_sync_subscribe_returns_tail_and_state() {
        let (service, _sender) = setup(&[
            message("m1", "A", "s1"),
            message("m2", "B", "s2"),
            message("m3", "C", "s3"),
        ]);
        let response = service
            .subscribe_last_messages(&subscribe_request("sub1", 2))
            .unwrap();

        let ids: Vec<&str> = response.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m2", "m3"]);
        assert_eq!(response.previous_order_id, "A");
        assert_eq!(response.chat_state.messages.counter, 3);
        assert_eq!(response.chat_state.last_state_id, "s3");
        assert!(response.dependencies.is_empty());
    }

    #[test]
    fn test_async_subscribe_replays_tail_as_events() {
        let (service, sender) = setup(&[
            message("m1", "A", "s1"),
            message("m2", "B", "s2"),
            message("m3", "C", "s3"),
        ]);
        let mut rx = sender.subscribe();
        let mut request = subscribe_request("sub1", 2);
        request.async_init = true;
        let response = service.subscribe_last_messages(&request).unwrap();
        assert!(response.messages.is_empty());

        let event = next_broadcast(&mut rx);
        assert_eq!(event.context_id, CHAT_ID);
        assert_eq!(event.messages.len(), 3);
        match &event.messages[0].payload {
            EventPayload::ChatAdd(add) => {
                assert_eq!(add.id, "m2");
                assert_eq!(add.after_order_id, "A");
                assert_eq!(add.sub_ids, vec!["sub1".to_owned()]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        match &event.messages[1].payload {
            EventPayload::ChatAdd(add) => {
                assert_eq!(add.id, "m3");
                assert_eq!(add.after_order_id, "B");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(matches!(
            event.messages[2].payload,
            EventPayload::ChatStateUpdate(_)
        ));
    }

    #[test]
    fn test_mark_read_messages_updates_counters_and_notifies() {
        let (service, sender) = setup(&[message("m1", "A", "s1"), message("m2", "B", "s2")]);
        service
            .subscribe_last_messages(&subscribe_request("sub1", 10))
            .unwrap();
        let mut rx = sender.subscribe();

        let read = service
            .mark_read_messages(CHAT_ID, "A", "B", "s9", CounterType::Message)
            .unwrap();
        assert_eq!(read, 2);

        let event = next_broadcast(&mut rx);
        match &event.messages[0].payload {
            EventPayload::ChatUpdateMessageReadStatus(status) => {
                assert_eq!(status.ids, vec!["m1".to_owned(), "m2".to_owned()]);
                assert!(status.is_read);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        match &event.messages[1].payload {
            EventPayload::ChatStateUpdate(update) => {
                assert_eq!(update.state.messages.counter, 0);
                assert_eq!(update.state.messages.oldest_order_id, "");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_mark_read_skips_messages_beyond_last_state_id() {
        let (service, _sender) = setup(&[message("m1", "A", "s1"), message("m2", "B", "s9")]);
        service
            .subscribe_last_messages(&subscribe_request("sub1", 10))
            .unwrap();
        let read = service
            .mark_read_messages(CHAT_ID, "A", "B", "s5", CounterType::Message)
            .unwrap();
        assert_eq!(read, 1);
        let manager = service.get_manager(CHAT_ID).unwrap();
        let state = manager.lock().get_chat_state();
        assert_eq!(state.messages.counter, 1);
        assert_eq!(state.messages.oldest_order_id, "B");
    }

    #[test]
    fn test_mark_unread_restores_counters() {
        let mut m1 = message("m1", "A", "s1");
        m1.read = true;
        let mut m2 = message("m2", "B", "s2");
        m2.read = true;
        let (service, sender) = setup(&[m1, m2]);
        service
            .subscribe_last_messages(&subscribe_request("sub1", 10))
            .unwrap();
        let mut rx = sender.subscribe();

        service
            .mark_unread_messages(CHAT_ID, "B", CounterType::Message)
            .unwrap();

        let event = next_broadcast(&mut rx);
        match &event.messages[0].payload {
            EventPayload::ChatUpdateMessageReadStatus(status) => {
                assert_eq!(status.ids, vec!["m2".to_owned()]);
                assert!(!status.is_read);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        match &event.messages[1].payload {
            EventPayload::ChatStateUpdate(update) => {
                assert_eq!(update.state.messages.counter, 1);
                assert_eq!(update.state.messages.oldest_order_id, "B");
                assert_eq!(update.state.last_state_id, "s2");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_update_sync_status_skips_unchanged_batches() {
        let (service, sender) = setup(&[message("m1", "A", "s1")]);
        service
            .subscribe_last_messages(&subscribe_request("sub1", 10))
            .unwrap();
        let mut rx = sender.subscribe();

        service
            .update_sync_status(CHAT_ID, &["m1".to_owned()], true)
            .unwrap();
        let event = next_broadcast(&mut rx);
        assert!(event.messages.iter().any(|msg| matches!(
            msg.payload,
            EventPayload::ChatUpdateMessageSyncStatus(_)
        )));

        service
            .update_sync_status(CHAT_ID, &["m1".to_owned()], true)
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_unknown_chat_is_fine() {
        let (service, _sender) = setup(&[]);
        service.unsubscribe("unknown", "sub1");
        service
            .subscribe_last_messages(&subscribe_request("sub1", 10))
            .unwrap();
        service.unsubscribe(CHAT_ID, "sub1");
        service.unsubscribe(CHAT_ID, "sub1");
    }

    #[test]
    fn test_manager_is_reused_per_chat() {
        let (service, _sender) = setup(&[]);
        let first = service.get_manager(CHAT_ID).unwrap();
        let second = service.get_manager(CHAT_ID).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.my_participant_id(), "space1_participant_me");
    }
}
