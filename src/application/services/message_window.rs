//! Sliding last-N message window and the event merge buffer.
//!
//! The window absorbs a burst of store changes and reduces it to the
//! smallest set of events a subscriber needs: one add per new message, one
//! event per change kind for the rest, deletes last.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::entities::Message;
use crate::domain::event::{
    ChatAddEvent, ChatDeleteEvent, ChatUpdateEvent, ChatUpdateReactionsEvent, EventMessage,
    EventPayload, ReadStatusEvent, SyncStatusEvent,
};

/// Change kinds recorded against a window entry before flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEvent {
    Add,
    Update,
    MessageRead,
    MentionRead,
    UpdateReactions,
    MessageSynced,
}

#[derive(Debug, Clone)]
struct StateEntry {
    message: Message,
    prev_order_id: String,
    events: Vec<WindowEvent>,
}

impl StateEntry {
    fn record(&mut self, event: WindowEvent) {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }
}

/// Capacity-bounded view over the tail of a chat, keyed by order id.
///
/// Adds may evict the front entry; updates to messages outside the window
/// are tracked separately and limited to body and reaction changes.
#[derive(Debug)]
pub struct MessageWindow {
    limit: usize,
    // order id -> message id
    window: BTreeMap<String, String>,
    entries: HashMap<String, StateEntry>,
    out_of_window: HashMap<String, StateEntry>,
    delete_ids: Vec<String>,
}

impl MessageWindow {
    /// Creates an empty window holding at most `limit` messages.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            window: BTreeMap::new(),
            entries: HashMap::new(),
            out_of_window: HashMap::new(),
            delete_ids: Vec::new(),
        }
    }

    /// Admits a new message. When the window is full the front entry is
    /// evicted, but only for messages ordered after it; older messages are
    /// ignored. With `add_event` false the message enters the window
    /// silently, for pre-seeding a view.
    pub fn apply_add(
        &mut self,
        message: Message,
        prev_order_id: impl Into<String>,
        add_event: bool,
    ) {
        if let Some(entry) = self.entries.get_mut(&message.id) {
            entry.message = message;
            if add_event {
                entry.record(WindowEvent::Add);
            }
            return;
        }
        if self.window.len() >= self.limit {
            let Some(front) = self.window.keys().next().cloned() else {
                return;
            };
            if message.order_id <= front {
                return;
            }
            if let Some(evicted_id) = self.window.remove(&front) {
                self.entries.remove(&evicted_id);
            }
        }
        self.window
            .insert(message.order_id.clone(), message.id.clone());
        self.entries.insert(
            message.id.clone(),
            StateEntry {
                prev_order_id: prev_order_id.into(),
                message,
                events: if add_event {
                    vec![WindowEvent::Add]
                } else {
                    Vec::new()
                },
            },
        );
    }

    /// Replaces a message body. Messages outside the window are tracked too.
    pub fn apply_update(&mut self, message: Message) {
        self.upsert(message, WindowEvent::Update);
    }

    /// Replaces a message's reactions. Messages outside the window are
    /// tracked too.
    pub fn apply_update_reactions(&mut self, message: Message) {
        self.upsert(message, WindowEvent::UpdateReactions);
    }

    /// Flips the read flag on in-window messages.
    pub fn apply_read_status(&mut self, ids: &[String], is_read: bool) {
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.message.read = is_read;
                entry.record(WindowEvent::MessageRead);
            }
        }
    }

    /// Flips the mention-read flag on in-window messages.
    pub fn apply_mention_read_status(&mut self, ids: &[String], is_read: bool) {
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.message.mention_read = is_read;
                entry.record(WindowEvent::MentionRead);
            }
        }
    }

    /// Flips the synced flag on in-window messages.
    pub fn apply_sync_status(&mut self, ids: &[String], is_synced: bool) {
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.message.synced = is_synced;
                entry.record(WindowEvent::MessageSynced);
            }
        }
    }

    /// Removes a message and records its deletion.
    pub fn apply_delete(&mut self, id: &str) {
        if let Some(entry) = self.entries.remove(id) {
            self.window.remove(&entry.message.order_id);
        }
        self.out_of_window.remove(id);
        self.delete_ids.push(id.to_owned());
    }

    /// Drains all recorded changes into the buffer on behalf of one
    /// subscription: in-window entries in order-id order, then
    /// out-of-window entries, then deletes.
    pub fn append_events_to(&mut self, sub_id: &str, buffer: &mut EventsBuffer) {
        for message_id in self.window.values() {
            if let Some(entry) = self.entries.get_mut(message_id) {
                let events = std::mem::take(&mut entry.events);
                if !events.is_empty() {
                    buffer.push(
                        entry.message.clone(),
                        entry.prev_order_id.clone(),
                        events,
                        sub_id,
                    );
                }
            }
        }
        let mut stale: Vec<String> = self.out_of_window.keys().cloned().collect();
        stale.sort_unstable();
        for message_id in stale {
            if let Some(mut entry) = self.out_of_window.remove(&message_id) {
                let events = std::mem::take(&mut entry.events);
                if !events.is_empty() {
                    buffer.push(entry.message, entry.prev_order_id, events, sub_id);
                }
            }
        }
        for id in self.delete_ids.drain(..) {
            buffer.push_delete(id, sub_id);
        }
    }

    /// Drops every entry and pending change.
    pub fn reset(&mut self) {
        self.window.clear();
        self.entries.clear();
        self.out_of_window.clear();
        self.delete_ids.clear();
    }

    /// Number of messages currently inside the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// True when the window holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    fn upsert(&mut self, message: Message, event: WindowEvent) {
        if let Some(entry) = self.entries.get_mut(&message.id) {
            entry.message = message;
            entry.record(event);
            return;
        }
        let entry = self
            .out_of_window
            .entry(message.id.clone())
            .or_insert_with(|| StateEntry {
                message: message.clone(),
                prev_order_id: String::new(),
                events: Vec::new(),
            });
        entry.message = message;
        entry.record(event);
    }
}

#[derive(Debug, Clone)]
struct BufferedMessage {
    message: Message,
    prev_order_id: String,
    events: Vec<WindowEvent>,
    sub_ids: BTreeSet<String>,
}

/// Accumulates drained window changes across subscriptions and turns them
/// into the final event payloads.
#[derive(Debug, Default)]
pub struct EventsBuffer {
    order: Vec<String>,
    by_message: HashMap<String, BufferedMessage>,
    deletes: Vec<String>,
    delete_sub_ids: BTreeSet<String>,
}

impl EventsBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        message: Message,
        prev_order_id: String,
        events: Vec<WindowEvent>,
        sub_id: &str,
    ) {
        if let Some(buffered) = self.by_message.get_mut(&message.id) {
            buffered.message = message;
            for event in events {
                if !buffered.events.contains(&event) {
                    buffered.events.push(event);
                }
            }
            buffered.sub_ids.insert(sub_id.to_owned());
            return;
        }
        self.order.push(message.id.clone());
        self.by_message.insert(
            message.id.clone(),
            BufferedMessage {
                message,
                prev_order_id,
                events,
                sub_ids: BTreeSet::from([sub_id.to_owned()]),
            },
        );
    }

    fn push_delete(&mut self, id: String, sub_id: &str) {
        if !self.deletes.contains(&id) {
            self.deletes.push(id);
        }
        self.delete_sub_ids.insert(sub_id.to_owned());
    }

    /// Builds the event payloads in deterministic order and resets the
    /// buffer. An add dominates every other change to the same message;
    /// deletes always come last.
    pub fn build(&mut self, space_id: &str) -> Vec<EventMessage> {
        let mut out = Vec::new();
        for message_id in self.order.drain(..) {
            let Some(buffered) = self.by_message.remove(&message_id) else {
                continue;
            };
            let sub_ids: Vec<String> = buffered.sub_ids.iter().cloned().collect();
            if buffered.events.contains(&WindowEvent::Add) {
                out.push(EventMessage {
                    space_id: space_id.to_owned(),
                    payload: EventPayload::ChatAdd(ChatAddEvent {
                        id: buffered.message.id.clone(),
                        order_id: buffered.message.order_id.clone(),
                        after_order_id: buffered.prev_order_id.clone(),
                        message: buffered.message,
                        sub_ids,
                        dependencies: Vec::new(),
                    }),
                });
                continue;
            }
            for event in &buffered.events {
                let payload = match event {
                    WindowEvent::Add => continue,
                    WindowEvent::Update => EventPayload::ChatUpdate(ChatUpdateEvent {
                        id: buffered.message.id.clone(),
                        message: buffered.message.clone(),
                        sub_ids: sub_ids.clone(),
                    }),
                    WindowEvent::UpdateReactions => {
                        EventPayload::ChatUpdateReactions(ChatUpdateReactionsEvent {
                            id: buffered.message.id.clone(),
                            reactions: buffered.message.reactions.clone(),
                            sub_ids: sub_ids.clone(),
                        })
                    }
                    WindowEvent::MessageRead => {
                        EventPayload::ChatUpdateMessageReadStatus(ReadStatusEvent {
                            ids: vec![buffered.message.id.clone()],
                            is_read: buffered.message.read,
                            sub_ids: sub_ids.clone(),
                        })
                    }
                    WindowEvent::MentionRead => {
                        EventPayload::ChatUpdateMentionReadStatus(ReadStatusEvent {
                            ids: vec![buffered.message.id.clone()],
                            is_read: buffered.message.mention_read,
                            sub_ids: sub_ids.clone(),
                        })
                    }
                    WindowEvent::MessageSynced => {
                        EventPayload::ChatUpdateMessageSyncStatus(SyncStatusEvent {
                            ids: vec![buffered.message.id.clone()],
                            is_synced: buffered.message.synced,
                            sub_ids: sub_ids.clone(),
                        })
                    }
                };
                out.push(EventMessage {
                    space_id: space_id.to_owned(),
                    payload,
                });
            }
        }
        let delete_sub_ids: Vec<String> = self.delete_sub_ids.iter().cloned().collect();
        for id in self.deletes.drain(..) {
            out.push(EventMessage {
                space_id: space_id.to_owned(),
                payload: EventPayload::ChatDelete(ChatDeleteEvent {
                    id,
                    sub_ids: delete_sub_ids.clone(),
                }),
            });
        }
        self.by_message.clear();
        self.delete_sub_ids.clear();
        out
    }
}
