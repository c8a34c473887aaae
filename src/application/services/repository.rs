//! Per-chat message repository over the document store.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::domain::entities::{
    ChatState, CounterType, Message, MessagesGetter, ORDER_KEY, REACTIONS_KEY, STATE_ID_KEY,
    SYNCED_KEY,
};
use crate::domain::errors::{ChatError, StoreError};
use crate::domain::ports::{
    Collection, CompareOp, DocumentStore, Filter, FindQuery, ReadTx, Sort, SpaceIdResolver,
};

fn order_path() -> [&'static str; 2] {
    [ORDER_KEY, "id"]
}

/// Opens per-chat repositories, one collection per chat object.
pub struct RepositoryService {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<dyn SpaceIdResolver>,
}

impl RepositoryService {
    /// Creates the service over a store and a space resolver.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, resolver: Arc<dyn SpaceIdResolver>) -> Self {
        Self { store, resolver }
    }

    /// Opens the repository for a chat object, creating its collection on
    /// first use.
    pub fn repository(&self, chat_object_id: &str) -> Result<ChatRepository, ChatError> {
        let space_id = self.resolver.resolve_space_id(chat_object_id)?;
        let name = format!("{chat_object_id}chats");
        let collection = match self.store.open_collection(&name) {
            Ok(collection) => collection,
            Err(StoreError::CollectionNotFound { .. }) => self.store.create_collection(&name)?,
            Err(err) => return Err(err.into()),
        };
        Ok(ChatRepository {
            chat_object_id: chat_object_id.to_owned(),
            space_id,
            collection,
        })
    }
}

/// Paging request for [`ChatRepository::get_messages`].
#[derive(Debug, Clone, Default)]
pub struct GetMessagesRequest {
    /// Return messages ordered after this key.
    pub after_order_id: Option<String>,
    /// Return messages ordered before this key; ignored when
    /// `after_order_id` is set.
    pub before_order_id: Option<String>,
    /// Maximum number of messages.
    pub limit: usize,
    /// Include the message at the boundary key itself.
    pub include_boundary: bool,
}

/// Message storage for one chat: ordered reads, unread accounting queries
/// and flag updates.
pub struct ChatRepository {
    chat_object_id: String,
    space_id: String,
    collection: Arc<dyn Collection>,
}

impl ChatRepository {
    /// Chat object id this repository serves.
    #[must_use]
    pub fn chat_object_id(&self) -> &str {
        &self.chat_object_id
    }

    /// Space the chat object belongs to.
    #[must_use]
    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// Persists a new message, failing on a duplicate id.
    pub fn add_message(&self, message: &Message) -> Result<(), ChatError> {
        message.validate()?;
        let mut tx = self.collection.write_tx();
        tx.insert(message.to_value())?;
        tx.commit()?;
        Ok(())
    }

    /// The maximum state id across all messages, empty for an empty chat.
    pub fn get_last_state_id(&self) -> Result<String, ChatError> {
        let tx = self.collection.read_tx();
        last_state_id_in(tx.as_ref())
    }

    /// Order id of the message directly preceding `order_id`, empty when
    /// it is the head of the chat.
    pub fn get_prev_order_id(&self, order_id: &str) -> Result<String, ChatError> {
        let tx = self.collection.read_tx();
        prev_order_id_in(tx.as_ref(), order_id)
    }

    /// Order id of the oldest message the counter treats as unread, empty
    /// when everything is read.
    pub fn get_oldest_order_id(&self, counter_type: CounterType) -> Result<String, ChatError> {
        let tx = self.collection.read_tx();
        oldest_order_id_in(tx.as_ref(), counter_type)
    }

    /// Ids of already-read messages ordered at or after `after_order_id`,
    /// scoped to the messages the counter covers.
    pub fn get_read_messages_after(
        &self,
        after_order_id: &str,
        counter_type: CounterType,
    ) -> Result<Vec<String>, ChatError> {
        let mut filters = vec![
            Filter::key(order_path(), CompareOp::Gte, json!(after_order_id)),
            Filter::eq([counter_type.read_key()], json!(true)),
        ];
        if let Some(scope) = counter_type.messages_filter() {
            filters.push(scope);
        }
        self.find_ids(Filter::And(filters))
    }

    /// Ids of unread messages in `[after_order_id, before_order_id]`,
    /// excluding messages published after `last_state_id`. An empty
    /// `before_order_id` leaves the range open-ended.
    pub fn get_unread_message_ids_in_range(
        &self,
        after_order_id: &str,
        before_order_id: &str,
        last_state_id: &str,
        counter_type: CounterType,
    ) -> Result<Vec<String>, ChatError> {
        let mut filters = vec![
            counter_type.unread_filter(),
            Filter::key(order_path(), CompareOp::Gte, json!(after_order_id)),
            Filter::Or(vec![
                Filter::not(Filter::exists([STATE_ID_KEY])),
                Filter::key([STATE_ID_KEY], CompareOp::Lte, json!(last_state_id)),
            ]),
        ];
        if !before_order_id.is_empty() {
            filters.push(Filter::key(
                order_path(),
                CompareOp::Lte,
                json!(before_order_id),
            ));
        }
        self.find_ids(Filter::And(filters))
    }

    /// Ids of all messages the counter treats as unread, ascending by
    /// order id.
    pub fn get_all_unread_messages(
        &self,
        counter_type: CounterType,
    ) -> Result<Vec<String>, ChatError> {
        self.find_ids(counter_type.unread_filter())
    }

    /// Flips the counter's read flag on the given messages inside one
    /// write transaction. Missing documents and per-document failures are
    /// skipped; the returned ids are the messages that actually changed.
    pub fn set_read_flag(
        &self,
        ids: &[String],
        counter_type: CounterType,
        value: bool,
    ) -> Result<Vec<String>, ChatError> {
        let mut tx = self.collection.write_tx();
        let mut modified = Vec::new();
        for id in ids {
            if *id == self.chat_object_id {
                continue;
            }
            let mut modifier = counter_type.read_modifier(value);
            match tx.update_id(id, &mut modifier) {
                Ok(result) if result.modified => modified.push(id.clone()),
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(message_id = %id, error = %err, "failed to set read flag");
                }
            }
        }
        tx.commit()?;
        Ok(modified)
    }

    /// Flips the synced flag on the given messages. Missing documents are
    /// skipped; the returned ids are the messages that actually changed.
    pub fn set_synced_flag(
        &self,
        ids: &[String],
        is_synced: bool,
    ) -> Result<Vec<String>, ChatError> {
        let mut tx = self.collection.write_tx();
        let mut modified = Vec::new();
        for id in ids {
            let mut modifier = |doc: &mut serde_json::Value| -> Result<bool, StoreError> {
                let current = doc
                    .get(SYNCED_KEY)
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if current == is_synced {
                    return Ok(false);
                }
                doc[SYNCED_KEY] = json!(is_synced);
                Ok(true)
            };
            match tx.update_id(id, &mut modifier) {
                Ok(result) if result.modified => modified.push(id.clone()),
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(message_id = %id, error = %err, "failed to set synced flag");
                }
            }
        }
        tx.commit()?;
        Ok(modified)
    }

    /// Pages through messages around an order-id boundary. The result is
    /// always ascending by order id regardless of paging direction.
    pub fn get_messages(&self, request: &GetMessagesRequest) -> Result<Vec<Message>, ChatError> {
        let tx = self.collection.read_tx();
        let mut messages = if let Some(after) = &request.after_order_id {
            let op = if request.include_boundary {
                CompareOp::Gte
            } else {
                CompareOp::Gt
            };
            let query = FindQuery::new(Filter::key(order_path(), op, json!(after)))
                .with_sort(Sort::asc(order_path()))
                .with_limit(request.limit);
            decode_all(&tx.find(&query)?)?
        } else if let Some(before) = &request.before_order_id {
            let op = if request.include_boundary {
                CompareOp::Lte
            } else {
                CompareOp::Lt
            };
            let query = FindQuery::new(Filter::key(order_path(), op, json!(before)))
                .with_sort(Sort::desc(order_path()))
                .with_limit(request.limit);
            decode_all(&tx.find(&query)?)?
        } else {
            let query = FindQuery::new(Filter::All)
                .with_sort(Sort::desc(order_path()))
                .with_limit(request.limit);
            decode_all(&tx.find(&query)?)?
        };
        messages.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(messages)
    }

    /// Last `limit` messages of the chat, ascending by order id.
    pub fn get_last_messages(&self, limit: usize) -> Result<Vec<Message>, ChatError> {
        self.get_messages(&GetMessagesRequest {
            limit,
            ..GetMessagesRequest::default()
        })
    }

    /// Last `limit` messages plus the order id directly before them, both
    /// read from one snapshot so the tail and its predecessor agree.
    pub fn get_last_messages_with_prev(
        &self,
        limit: usize,
    ) -> Result<(Vec<Message>, String), ChatError> {
        let tx = self.collection.read_tx();
        let query = FindQuery::new(Filter::All)
            .with_sort(Sort::desc(order_path()))
            .with_limit(limit);
        let mut messages = decode_all(&tx.find(&query)?)?;
        messages.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        let previous_order_id = match messages.first() {
            Some(first) => prev_order_id_in(tx.as_ref(), &first.order_id)?,
            None => String::new(),
        };
        Ok((messages, previous_order_id))
    }

    /// True when `identity` already reacted with `emoji` on the message.
    pub fn has_my_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        identity: &str,
    ) -> Result<bool, ChatError> {
        let tx = self.collection.read_tx();
        let doc = tx.find_id(message_id)?;
        Ok(doc
            .get(REACTIONS_KEY)
            .and_then(|reactions| reactions.get(emoji))
            .and_then(serde_json::Value::as_array)
            .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(identity))))
    }

    /// Computes the full aggregate state from a single stable snapshot.
    pub fn load_chat_state(&self) -> Result<ChatState, ChatError> {
        let tx = self.collection.read_tx();
        let mut state = ChatState::default();
        for counter_type in [CounterType::Message, CounterType::Mention] {
            let unread = state.by_type_mut(counter_type);
            unread.oldest_order_id = oldest_order_id_in(tx.as_ref(), counter_type)?;
            let count = tx.count(&counter_type.unread_filter())?;
            unread.counter = i32::try_from(count).unwrap_or(i32::MAX);
        }
        state.last_state_id = last_state_id_in(tx.as_ref())?;
        Ok(state)
    }

    fn find_ids(&self, filter: Filter) -> Result<Vec<String>, ChatError> {
        let tx = self.collection.read_tx();
        let query = FindQuery::new(filter).with_sort(Sort::asc(order_path()));
        Ok(tx
            .find(&query)?
            .iter()
            .filter_map(|doc| doc.get("id").and_then(serde_json::Value::as_str))
            .map(str::to_owned)
            .collect())
    }
}

impl MessagesGetter for ChatRepository {
    /// Fetches messages by id from one snapshot, preserving input order
    /// and skipping missing ids.
    fn get_messages_by_ids(&self, ids: &[String]) -> Result<Vec<Message>, ChatError> {
        let tx = self.collection.read_tx();
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match tx.find_id(id) {
                Ok(doc) => messages.push(Message::from_value(&doc)?),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(messages)
    }
}

fn decode_all(docs: &[serde_json::Value]) -> Result<Vec<Message>, ChatError> {
    docs.iter().map(|doc| Message::from_value(doc)).collect()
}

fn prev_order_id_in(tx: &dyn ReadTx, order_id: &str) -> Result<String, ChatError> {
    let query = FindQuery::new(Filter::key(order_path(), CompareOp::Lt, json!(order_id)))
        .with_sort(Sort::desc(order_path()))
        .with_limit(1);
    let found = tx.find(&query)?;
    Ok(found
        .first()
        .map(|doc| Message::from_value(doc))
        .transpose()?
        .map(|msg| msg.order_id)
        .unwrap_or_default())
}

fn oldest_order_id_in(
    tx: &dyn ReadTx,
    counter_type: CounterType,
) -> Result<String, ChatError> {
    let query = FindQuery::new(counter_type.unread_filter())
        .with_sort(Sort::asc(order_path()))
        .with_limit(1);
    let found = tx.find(&query)?;
    Ok(found
        .first()
        .map(|doc| Message::from_value(doc))
        .transpose()?
        .map(|msg| msg.order_id)
        .unwrap_or_default())
}

fn last_state_id_in(tx: &dyn ReadTx) -> Result<String, ChatError> {
    let query = FindQuery::new(Filter::All)
        .with_sort(Sort::desc([STATE_ID_KEY]))
        .with_limit(1);
    let found = tx.find(&query)?;
    Ok(found
        .first()
        .map(|doc| Message::from_value(doc))
        .transpose()?
        .map(|msg| msg.state_id)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockSpaceIdResolver;
    use crate::infrastructure::store::MemStore;

    const CHAT_ID: &str = "chat1";

    fn repo() -> ChatRepository {
        let mut resolver = MockSpaceIdResolver::new();
        resolver
            .expect_resolve_space_id()
            .returning(|_| Ok("space1".to_owned()));
        let service = RepositoryService::new(Arc::new(MemStore::new()), Arc::new(resolver));
        service.repository(CHAT_ID).unwrap()
    }

    fn message(id: &str, order_id: &str) -> Message {
        Message::new(id, "creator", "text").with_order_id(order_id)
    }

    fn repo_with(messages: &[Message]) -> ChatRepository {
        let repo = repo();
        for msg in messages {
            repo.add_message(msg).unwrap();
        }
        repo
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_add_message_rejects_duplicates() {
        let repo = repo_with(&[message("m1", "A")]);
        let err = repo.add_message(&message("m1", "B")).unwrap_err();
        assert!(matches!(
            err,
            ChatError::Repo(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_get_messages_after_boundary() {
        let repo = repo_with(&[
            message("m1", "A"),
            message("m2", "B"),
            message("m3", "C"),
            message("m4", "D"),
        ]);
        let found = repo
            .get_messages(&GetMessagesRequest {
                after_order_id: Some("B".to_owned()),
                limit: 10,
                ..GetMessagesRequest::default()
            })
            .unwrap();
        assert_eq!(ids(&found), ["m3", "m4"]);

        let with_boundary = repo
            .get_messages(&GetMessagesRequest {
                after_order_id: Some("B".to_owned()),
                limit: 10,
                include_boundary: true,
                ..GetMessagesRequest::default()
            })
            .unwrap();
        assert_eq!(ids(&with_boundary), ["m2", "m3", "m4"]);
    }

    #[test]
    fn test_get_messages_before_boundary_is_ascending() {
        let repo = repo_with(&[
            message("m1", "A"),
            message("m2", "B"),
            message("m3", "C"),
            message("m4", "D"),
        ]);
        // the closest two before "D", still in ascending order
        let found = repo
            .get_messages(&GetMessagesRequest {
                before_order_id: Some("D".to_owned()),
                limit: 2,
                ..GetMessagesRequest::default()
            })
            .unwrap();
        assert_eq!(ids(&found), ["m2", "m3"]);
    }

    #[test]
    fn test_get_last_messages_takes_the_tail() {
        let repo = repo_with(&[message("m1", "A"), message("m2", "B"), message("m3", "C")]);
        let found = repo.get_last_messages(2).unwrap();
        assert_eq!(ids(&found), ["m2", "m3"]);
    }

    #[test]
    fn test_get_last_messages_with_prev_reads_one_snapshot() {
        let repo = repo_with(&[message("m1", "A"), message("m2", "B"), message("m3", "C")]);
        let (found, prev) = repo.get_last_messages_with_prev(2).unwrap();
        assert_eq!(ids(&found), ["m2", "m3"]);
        assert_eq!(prev, "A");

        let (all, prev) = repo.get_last_messages_with_prev(10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(prev, "");

        let (none, prev) = repo_with(&[]).get_last_messages_with_prev(2).unwrap();
        assert!(none.is_empty());
        assert_eq!(prev, "");
    }

    #[test]
    fn test_get_prev_order_id() {
        let repo = repo_with(&[message("m1", "A"), message("m2", "C")]);
        assert_eq!(repo.get_prev_order_id("C").unwrap(), "A");
        assert_eq!(repo.get_prev_order_id("A").unwrap(), "");
    }

    #[test]
    fn test_get_last_state_id_picks_maximum() {
        let repo = repo_with(&[
            message("m1", "A").with_state_id("s3"),
            message("m2", "B").with_state_id("s9"),
            message("m3", "C").with_state_id("s5"),
        ]);
        assert_eq!(repo.get_last_state_id().unwrap(), "s9");
        assert_eq!(repo_with(&[]).get_last_state_id().unwrap(), "");
    }

    #[test]
    fn test_get_messages_by_ids_preserves_order_and_skips_missing() {
        let repo = repo_with(&[message("m1", "A"), message("m2", "B")]);
        let found = repo
            .get_messages_by_ids(&[
                "m2".to_owned(),
                "missing".to_owned(),
                "m1".to_owned(),
            ])
            .unwrap();
        assert_eq!(ids(&found), ["m2", "m1"]);
    }

    #[test]
    fn test_set_read_flag_reports_only_changed() {
        let mut read = message("m2", "B");
        read.read = true;
        let repo = repo_with(&[message("m1", "A"), read]);
        let modified = repo
            .set_read_flag(
                &[
                    "m1".to_owned(),
                    "m2".to_owned(),
                    "missing".to_owned(),
                    CHAT_ID.to_owned(),
                ],
                CounterType::Message,
                true,
            )
            .unwrap();
        assert_eq!(modified, vec!["m1".to_owned()]);
        let state = repo.load_chat_state().unwrap();
        assert_eq!(state.messages.counter, 0);
    }

    #[test]
    fn test_set_synced_flag_is_idempotent() {
        let repo = repo_with(&[message("m1", "A")]);
        let first = repo.set_synced_flag(&["m1".to_owned()], true).unwrap();
        assert_eq!(first, vec!["m1".to_owned()]);
        let second = repo.set_synced_flag(&["m1".to_owned()], true).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_load_chat_state_counts_both_counters() {
        let mut mention = message("m2", "B");
        mention.has_mention = true;
        let mut read_mention = message("m3", "C");
        read_mention.has_mention = true;
        read_mention.mention_read = true;
        read_mention.read = true;
        let repo = repo_with(&[
            message("m1", "A").with_state_id("s1"),
            mention.with_state_id("s2"),
            read_mention.with_state_id("s3"),
        ]);

        let state = repo.load_chat_state().unwrap();
        assert_eq!(state.messages.counter, 2);
        assert_eq!(state.messages.oldest_order_id, "A");
        assert_eq!(state.mentions.counter, 1);
        assert_eq!(state.mentions.oldest_order_id, "B");
        assert_eq!(state.last_state_id, "s3");
    }

    #[test]
    fn test_empty_counter_has_empty_oldest_order_id() {
        let mut read = message("m1", "A");
        read.read = true;
        read.mention_read = true;
        let repo = repo_with(&[read]);
        let state = repo.load_chat_state().unwrap();
        assert_eq!(state.messages.counter, 0);
        assert_eq!(state.messages.oldest_order_id, "");
        assert_eq!(state.mentions.counter, 0);
        assert_eq!(state.mentions.oldest_order_id, "");
    }

    #[test]
    fn test_unread_range_gated_by_state_id() {
        let repo = repo_with(&[
            message("m1", "A").with_state_id("s1"),
            message("m2", "B").with_state_id("s9"),
            message("m3", "C"),
        ]);
        // m2 was published after the requester's view of the chat
        let found = repo
            .get_unread_message_ids_in_range("A", "C", "s5", CounterType::Message)
            .unwrap();
        assert_eq!(found, vec!["m1".to_owned(), "m3".to_owned()]);
    }

    #[test]
    fn test_unread_range_open_ended_without_before() {
        let repo = repo_with(&[
            message("m1", "A").with_state_id("s1"),
            message("m2", "B").with_state_id("s2"),
        ]);
        let found = repo
            .get_unread_message_ids_in_range("B", "", "s9", CounterType::Message)
            .unwrap();
        assert_eq!(found, vec!["m2".to_owned()]);
    }

    #[test]
    fn test_get_read_messages_after_scopes_to_mentions() {
        let mut read_plain = message("m1", "A");
        read_plain.read = true;
        let mut read_mention = message("m2", "B");
        read_mention.has_mention = true;
        read_mention.mention_read = true;
        let repo = repo_with(&[read_plain, read_mention]);

        let mentions = repo
            .get_read_messages_after("A", CounterType::Mention)
            .unwrap();
        assert_eq!(mentions, vec!["m2".to_owned()]);

        let all = repo
            .get_read_messages_after("A", CounterType::Message)
            .unwrap();
        assert_eq!(all, vec!["m1".to_owned()]);
    }

    #[test]
    fn test_has_my_reaction() {
        let mut msg = message("m1", "A");
        msg.reactions
            .insert("👍".to_owned(), vec!["idA".to_owned()]);
        let repo = repo_with(&[msg]);
        assert!(repo.has_my_reaction("m1", "👍", "idA").unwrap());
        assert!(!repo.has_my_reaction("m1", "👍", "idB").unwrap());
        assert!(!repo.has_my_reaction("m1", "🔥", "idA").unwrap());
    }

    #[test]
    fn test_get_all_unread_messages_ascending() {
        let mut read = message("m2", "B");
        read.read = true;
        let repo = repo_with(&[message("m3", "C"), read, message("m1", "A")]);
        let found = repo.get_all_unread_messages(CounterType::Message).unwrap();
        assert_eq!(found, vec!["m1".to_owned(), "m3".to_owned()]);
    }
}
