//! In-memory document store with transactional collections.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;

use crate::domain::errors::StoreError;
use crate::domain::ports::{
    Collection, DocumentStore, Filter, FindQuery, Modifier, ReadTx, Sort, UpdateResult, WriteTx,
};

type Docs = BTreeMap<String, Value>;

/// Process-local [`DocumentStore`] keeping every collection in memory.
#[derive(Debug, Default)]
pub struct MemStore {
    collections: RwLock<HashMap<String, Arc<MemCollection>>>,
}

impl MemStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemStore {
    fn open_collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        let collections = self.collections.read();
        collections
            .get(name)
            .map(|c| Arc::clone(c) as Arc<dyn Collection>)
            .ok_or_else(|| StoreError::CollectionNotFound {
                name: name.to_owned(),
            })
    }

    fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(StoreError::AlreadyExists {
                id: name.to_owned(),
            });
        }
        let collection = Arc::new(MemCollection {
            name: name.to_owned(),
            docs: RwLock::new(Docs::new()),
        });
        collections.insert(name.to_owned(), Arc::clone(&collection));
        Ok(collection)
    }
}

/// One in-memory collection, documents keyed by their `id` field.
#[derive(Debug)]
pub struct MemCollection {
    name: String,
    docs: RwLock<Docs>,
}

impl Collection for MemCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_tx(&self) -> Box<dyn ReadTx + '_> {
        Box::new(MemReadTx {
            docs: self.docs.read(),
        })
    }

    fn write_tx(&self) -> Box<dyn WriteTx + '_> {
        let docs = self.docs.write();
        let snapshot = docs.clone();
        Box::new(MemWriteTx {
            docs,
            snapshot,
            committed: false,
        })
    }
}

struct MemReadTx<'a> {
    docs: RwLockReadGuard<'a, Docs>,
}

impl ReadTx for MemReadTx<'_> {
    fn find_id(&self, id: &str) -> Result<Value, StoreError> {
        find_id_in(&self.docs, id)
    }

    fn find(&self, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        Ok(run_query(&self.docs, query))
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.docs.values().filter(|doc| filter.matches(doc)).count())
    }
}

struct MemWriteTx<'a> {
    docs: RwLockWriteGuard<'a, Docs>,
    snapshot: Docs,
    committed: bool,
}

impl ReadTx for MemWriteTx<'_> {
    fn find_id(&self, id: &str) -> Result<Value, StoreError> {
        find_id_in(&self.docs, id)
    }

    fn find(&self, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        Ok(run_query(&self.docs, query))
    }

    fn count(&self, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.docs.values().filter(|doc| filter.matches(doc)).count())
    }
}

impl WriteTx for MemWriteTx<'_> {
    fn insert(&mut self, doc: Value) -> Result<(), StoreError> {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::invalid_document("missing id field"))?
            .to_owned();
        if self.docs.contains_key(&id) {
            return Err(StoreError::AlreadyExists { id });
        }
        self.docs.insert(id, doc);
        Ok(())
    }

    fn update_id(&mut self, id: &str, modifier: Modifier<'_>) -> Result<UpdateResult, StoreError> {
        let Some(doc) = self.docs.get(id) else {
            return Err(StoreError::DocNotFound { id: id.to_owned() });
        };
        let mut candidate = doc.clone();
        let modified = modifier(&mut candidate)?;
        if modified {
            self.docs.insert(id.to_owned(), candidate);
        }
        Ok(UpdateResult { modified })
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemWriteTx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            *self.docs = mem::take(&mut self.snapshot);
        }
    }
}

fn find_id_in(docs: &Docs, id: &str) -> Result<Value, StoreError> {
    docs.get(id)
        .cloned()
        .ok_or_else(|| StoreError::DocNotFound { id: id.to_owned() })
}

fn run_query(docs: &Docs, query: &FindQuery) -> Vec<Value> {
    let mut found: Vec<Value> = docs
        .values()
        .filter(|doc| query.filter.matches(doc))
        .cloned()
        .collect();
    if let Some(sort) = &query.sort {
        sort_docs(&mut found, sort);
    }
    if let Some(limit) = query.limit {
        found.truncate(limit);
    }
    found
}

fn sort_docs(docs: &mut [Value], sort: &Sort) {
    docs.sort_by(|a, b| {
        let ordering = cmp_keys(lookup(a, &sort.path), lookup(b, &sort.path));
        if sort.desc { ordering.reverse() } else { ordering }
    });
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |v, key| v.get(key))
}

// documents missing the sort key come first ascending
fn cmp_keys(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => cmp_values(a, b),
    }
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::ports::CompareOp;

    fn collection_with(docs: &[Value]) -> Arc<dyn Collection> {
        let store = MemStore::new();
        let collection = store.create_collection("test").unwrap();
        let mut tx = collection.write_tx();
        for doc in docs {
            tx.insert(doc.clone()).unwrap();
        }
        tx.commit().unwrap();
        collection
    }

    #[test]
    fn test_insert_and_find_id() {
        let collection = collection_with(&[json!({ "id": "a", "v": 1 })]);
        let tx = collection.read_tx();
        assert_eq!(tx.find_id("a").unwrap()["v"], json!(1));
        assert!(tx.find_id("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let collection = collection_with(&[json!({ "id": "a" })]);
        let mut tx = collection.write_tx();
        let err = tx.insert(json!({ "id": "a" })).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_write_tx_sees_its_own_writes() {
        let collection = collection_with(&[]);
        let mut tx = collection.write_tx();
        tx.insert(json!({ "id": "a", "v": 1 })).unwrap();
        assert_eq!(tx.find_id("a").unwrap()["v"], json!(1));
        assert_eq!(tx.count(&Filter::All).unwrap(), 1);
    }

    #[test]
    fn test_dropped_tx_rolls_back() {
        let collection = collection_with(&[json!({ "id": "a", "v": 1 })]);
        {
            let mut tx = collection.write_tx();
            tx.insert(json!({ "id": "b" })).unwrap();
            tx.update_id("a", &mut |doc| {
                doc["v"] = json!(2);
                Ok(true)
            })
            .unwrap();
        }
        let tx = collection.read_tx();
        assert!(tx.find_id("b").unwrap_err().is_not_found());
        assert_eq!(tx.find_id("a").unwrap()["v"], json!(1));
    }

    #[test]
    fn test_unchanged_modifier_is_a_noop() {
        let collection = collection_with(&[json!({ "id": "a", "v": 1 })]);
        let mut tx = collection.write_tx();
        let result = tx
            .update_id("a", &mut |doc| {
                doc["v"] = json!(99);
                // reporting no change discards the mutation
                Ok(false)
            })
            .unwrap();
        assert!(!result.modified);
        assert_eq!(tx.find_id("a").unwrap()["v"], json!(1));
    }

    #[test]
    fn test_find_sorts_and_limits() {
        let collection = collection_with(&[
            json!({ "id": "1", "_o": { "id": "C" } }),
            json!({ "id": "2", "_o": { "id": "A" } }),
            json!({ "id": "3", "_o": { "id": "B" } }),
        ]);
        let tx = collection.read_tx();
        let query = FindQuery::new(Filter::All)
            .with_sort(Sort::desc(["_o", "id"]))
            .with_limit(2);
        let found = tx.find(&query).unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["1", "3"]);
    }

    #[test]
    fn test_find_filters_on_comparison() {
        let collection = collection_with(&[
            json!({ "id": "1", "_o": { "id": "A" } }),
            json!({ "id": "2", "_o": { "id": "B" } }),
            json!({ "id": "3", "_o": { "id": "C" } }),
        ]);
        let tx = collection.read_tx();
        let query = FindQuery::new(Filter::key(["_o", "id"], CompareOp::Gt, json!("A")))
            .with_sort(Sort::asc(["_o", "id"]));
        let found = tx.find(&query).unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["2", "3"]);
    }

    #[test]
    fn test_open_collection_requires_creation() {
        let store = MemStore::new();
        assert!(store.open_collection("missing").err().unwrap().is_not_found());
        store.create_collection("c").unwrap();
        assert_eq!(store.open_collection("c").unwrap().name(), "c");
        assert!(matches!(
            store.create_collection("c").err().unwrap(),
            StoreError::AlreadyExists { .. }
        ));
    }
}
