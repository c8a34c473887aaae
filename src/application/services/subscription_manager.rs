//! Per-chat subscription manager: subscriber registry, event buffering,
//! unread counters and flush-time delivery.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error};

use crate::application::services::identity_cache::IdentityCache;
use crate::application::services::repository::ChatRepository;
use crate::domain::entities::{
    ChatState, CounterType, Details, Message, participant_id,
};
use crate::domain::event::{
    ChatAddEvent, ChatDeleteEvent, ChatStateUpdateEvent, ChatUpdateEvent,
    ChatUpdateReactionsEvent, Event, EventMessage, EventPayload, ReadStatusEvent, SyncStatusEvent,
};
use crate::domain::ports::{EventSender, SessionContext, SpaceIndex};

#[derive(Debug, Clone)]
struct Subscription {
    with_dependencies: bool,
}

#[derive(Default)]
struct ManagerState {
    subscriptions: BTreeMap<String, Subscription>,
    session_context: Option<Arc<dyn SessionContext>>,
    events_buffer: Vec<EventMessage>,
    chat_state: ChatState,
    need_reload_state: bool,
    chat_state_updated: bool,
}

/// Fan-out hub for one chat. All mutations go through the guard returned
/// by [`lock`](Self::lock); buffered events leave the manager only at
/// [`flush`](ManagerGuard::flush).
pub struct SubscriptionManager {
    space_id: String,
    chat_id: String,
    my_identity: String,
    my_participant_id: String,
    repository: Arc<ChatRepository>,
    space_index: Arc<dyn SpaceIndex>,
    event_sender: Arc<dyn EventSender>,
    identity_cache: Arc<IdentityCache>,
    state: Mutex<ManagerState>,
}

impl SubscriptionManager {
    /// Creates a manager seeded with the current aggregate state.
    #[must_use]
    pub fn new(
        chat_id: impl Into<String>,
        my_identity: impl Into<String>,
        initial_state: ChatState,
        repository: Arc<ChatRepository>,
        space_index: Arc<dyn SpaceIndex>,
        event_sender: Arc<dyn EventSender>,
        identity_cache: Arc<IdentityCache>,
    ) -> Self {
        let space_id = repository.space_id().to_owned();
        let my_identity = my_identity.into();
        let my_participant_id = participant_id(&space_id, &my_identity);
        Self {
            space_id,
            chat_id: chat_id.into(),
            my_identity,
            my_participant_id,
            repository,
            space_index,
            event_sender,
            identity_cache,
            state: Mutex::new(ManagerState {
                chat_state: initial_state,
                ..ManagerState::default()
            }),
        }
    }

    /// Chat object id this manager serves.
    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Space the chat object belongs to.
    #[must_use]
    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// Identity of the account this manager runs as.
    #[must_use]
    pub fn my_identity(&self) -> &str {
        &self.my_identity
    }

    /// Participant id of the current account in this space.
    #[must_use]
    pub fn my_participant_id(&self) -> &str {
        &self.my_participant_id
    }

    /// Message repository of this chat.
    #[must_use]
    pub fn repository(&self) -> &Arc<ChatRepository> {
        &self.repository
    }

    /// Acquires the per-chat lock. Every mutation and the flush happen
    /// under one guard, so a batch of changes is delivered atomically.
    pub fn lock(&self) -> ManagerGuard<'_> {
        ManagerGuard {
            manager: self,
            state: self.state.lock(),
        }
    }

    /// Details of the message creator and attachment targets. Creator
    /// details come through the identity cache; lookup failures are
    /// skipped so enrichment never blocks delivery.
    pub fn collect_message_dependencies(&self, message: &Message) -> Vec<Details> {
        let mut dependencies = Vec::new();
        if let Some(details) = self.creator_details(&message.creator) {
            dependencies.push(details);
        }
        for attachment in &message.attachments {
            match self.space_index.get_details(&attachment.target) {
                Ok(details) if !details.is_empty() => dependencies.push(details),
                Ok(_) => {}
                Err(err) => {
                    debug!(target_id = %attachment.target, error = %err, "attachment details lookup failed");
                }
            }
        }
        dependencies
    }

    fn creator_details(&self, creator: &str) -> Option<Details> {
        if let Some(details) = self.identity_cache.get(&self.space_id, creator) {
            return Some(details);
        }
        let id = participant_id(&self.space_id, creator);
        match self.space_index.get_details(&id) {
            Ok(details) if !details.is_empty() => {
                self.identity_cache
                    .insert(&self.space_id, creator, details.clone());
                Some(details)
            }
            Ok(_) => None,
            Err(err) => {
                debug!(participant_id = %id, error = %err, "creator details lookup failed");
                None
            }
        }
    }
}

/// Exclusive view over one manager's state.
pub struct ManagerGuard<'a> {
    manager: &'a SubscriptionManager,
    state: MutexGuard<'a, ManagerState>,
}

impl ManagerGuard<'_> {
    /// Binds the requesting session for the current batch. The context is
    /// dropped after the next flush.
    pub fn set_session_context(&mut self, context: Arc<dyn SessionContext>) {
        self.state.session_context = Some(context);
    }

    /// Registers a subscription, returning whether it is new. The first
    /// add schedules a state update for the next flush.
    pub fn subscribe(&mut self, sub_id: &str, with_dependencies: bool) -> bool {
        let added = self
            .state
            .subscriptions
            .insert(sub_id.to_owned(), Subscription { with_dependencies })
            .is_none();
        if added {
            self.state.chat_state_updated = true;
        }
        added
    }

    /// Removes a subscription.
    pub fn unsubscribe(&mut self, sub_id: &str) {
        self.state.subscriptions.remove(sub_id);
    }

    /// True when at least one subscription is registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state.subscriptions.is_empty()
    }

    /// Current aggregate state.
    #[must_use]
    pub fn get_chat_state(&self) -> ChatState {
        self.state.chat_state.clone()
    }

    /// Mutates the aggregate state and marks it for delivery.
    pub fn update_chat_state(&mut self, update: impl FnOnce(&mut ChatState)) {
        update(&mut self.state.chat_state);
        self.state.chat_state_updated = true;
    }

    /// Forces a state update on the next flush.
    pub fn force_state_update(&mut self) {
        self.state.chat_state_updated = true;
    }

    /// Buffers an add event for a new message.
    pub fn add(&mut self, prev_order_id: &str, message: &Message) {
        if !self.can_send() {
            return;
        }
        let payload = EventPayload::ChatAdd(ChatAddEvent {
            id: message.id.clone(),
            order_id: message.order_id.clone(),
            after_order_id: prev_order_id.to_owned(),
            message: message.clone(),
            sub_ids: self.all_sub_ids(),
            dependencies: Vec::new(),
        });
        self.buffer(payload);
    }

    /// Buffers a body update for an existing message.
    pub fn update_full(&mut self, message: &Message) {
        if !self.can_send() {
            return;
        }
        let payload = EventPayload::ChatUpdate(ChatUpdateEvent {
            id: message.id.clone(),
            message: message.clone(),
            sub_ids: self.all_sub_ids(),
        });
        self.buffer(payload);
    }

    /// Buffers a reactions update.
    pub fn update_reactions(&mut self, message: &Message) {
        if !self.can_send() {
            return;
        }
        let payload = EventPayload::ChatUpdateReactions(ChatUpdateReactionsEvent {
            id: message.id.clone(),
            reactions: message.reactions.clone(),
            sub_ids: self.all_sub_ids(),
        });
        self.buffer(payload);
    }

    /// Buffers a sync-status change.
    pub fn update_sync_status(&mut self, ids: Vec<String>, is_synced: bool) {
        if ids.is_empty() || !self.can_send() {
            return;
        }
        let payload = EventPayload::ChatUpdateMessageSyncStatus(SyncStatusEvent {
            ids,
            is_synced,
            sub_ids: self.all_sub_ids(),
        });
        self.buffer(payload);
    }

    /// Buffers a delete and schedules a full state reload for the next
    /// flush, since counters cannot be derived incrementally from a
    /// removal.
    pub fn delete(&mut self, message_id: &str) {
        self.state.need_reload_state = true;
        let payload = EventPayload::ChatDelete(ChatDeleteEvent {
            id: message_id.to_owned(),
            sub_ids: self.all_sub_ids(),
        });
        self.buffer(payload);
    }

    /// Applies a read batch: the counter drops by the number of modified
    /// messages and the oldest unread order id is replaced.
    pub fn read_messages(
        &mut self,
        new_oldest_order_id: &str,
        ids_modified: &[String],
        counter_type: CounterType,
    ) {
        if ids_modified.is_empty() {
            return;
        }
        let delta = i32::try_from(ids_modified.len()).unwrap_or(i32::MAX);
        let unread = self.state.chat_state.by_type_mut(counter_type);
        unread.counter = (unread.counter - delta).max(0);
        unread.oldest_order_id = new_oldest_order_id.to_owned();
        self.state.chat_state_updated = true;
        self.buffer_read_status(ids_modified.to_vec(), true, counter_type);
    }

    /// Applies an unread batch: the counter grows by the number of
    /// modified messages and the last state id is pinned to the value the
    /// caller observed.
    pub fn unread_messages(
        &mut self,
        new_oldest_order_id: &str,
        last_state_id: &str,
        ids_modified: &[String],
        counter_type: CounterType,
    ) {
        if ids_modified.is_empty() {
            return;
        }
        let delta = i32::try_from(ids_modified.len()).unwrap_or(i32::MAX);
        let unread = self.state.chat_state.by_type_mut(counter_type);
        unread.counter += delta;
        unread.oldest_order_id = new_oldest_order_id.to_owned();
        self.state.chat_state.last_state_id = last_state_id.to_owned();
        self.state.chat_state_updated = true;
        self.buffer_read_status(ids_modified.to_vec(), false, counter_type);
    }

    /// Appends pre-built events, as produced by the sliding window during
    /// asynchronous subscription initialization.
    pub fn push_buffered(&mut self, events: Vec<EventMessage>) {
        self.state.events_buffer.extend(events);
    }

    /// Delivers the buffered batch. With a bound session context the
    /// events go into that session's response and are broadcast to every
    /// other session; otherwise they are broadcast to all. Without any
    /// recipient the buffer is discarded.
    pub fn flush(&mut self) {
        if self.state.need_reload_state {
            match self.manager.repository.load_chat_state() {
                Ok(state) => {
                    self.state.need_reload_state = false;
                    self.state.chat_state = state;
                    self.state.chat_state_updated = true;
                }
                Err(err) => {
                    // transient failures retry on the next flush
                    self.state.need_reload_state = err.is_recoverable();
                    error!(chat_id = %self.manager.chat_id, error = %err, "failed to reload chat state");
                }
            }
        }

        if !self.can_send() {
            self.state.events_buffer.clear();
            return;
        }

        let mut events = mem::take(&mut self.state.events_buffer);

        if self
            .state
            .subscriptions
            .values()
            .any(|sub| sub.with_dependencies)
        {
            for event in &mut events {
                if let EventPayload::ChatAdd(add) = &mut event.payload {
                    add.dependencies = self.manager.collect_message_dependencies(&add.message);
                }
            }
        }

        if self.state.chat_state_updated {
            self.state.chat_state_updated = false;
            events.push(EventMessage {
                space_id: self.manager.space_id.clone(),
                payload: EventPayload::ChatStateUpdate(ChatStateUpdateEvent {
                    state: self.state.chat_state.clone(),
                    sub_ids: self.all_sub_ids(),
                }),
            });
        }

        let session_context = self.state.session_context.take();
        if events.is_empty() {
            return;
        }

        let event = Event {
            context_id: self.manager.chat_id.clone(),
            messages: events.clone(),
        };
        if let Some(context) = session_context {
            let mut session_events = context.get_messages(&self.manager.chat_id);
            session_events.extend(events);
            context.set_messages(&self.manager.chat_id, session_events);
            self.manager
                .event_sender
                .broadcast_to_other_sessions(context.id(), event);
        } else {
            self.manager.event_sender.broadcast(event);
        }
    }

    fn can_send(&self) -> bool {
        self.state.session_context.is_some() || self.is_active()
    }

    fn all_sub_ids(&self) -> Vec<String> {
        self.state.subscriptions.keys().cloned().collect()
    }

    fn buffer(&mut self, payload: EventPayload) {
        self.state.events_buffer.push(EventMessage {
            space_id: self.manager.space_id.clone(),
            payload,
        });
    }

    fn buffer_read_status(&mut self, ids: Vec<String>, is_read: bool, counter_type: CounterType) {
        if !self.can_send() {
            return;
        }
        let event = ReadStatusEvent {
            ids,
            is_read,
            sub_ids: self.all_sub_ids(),
        };
        let payload = match counter_type {
            CounterType::Message => EventPayload::ChatUpdateMessageReadStatus(event),
            CounterType::Mention => EventPayload::ChatUpdateMentionReadStatus(event),
        };
        self.buffer(payload);
    }
}
