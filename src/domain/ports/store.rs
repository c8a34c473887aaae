//! Document store contract: collections, transactions, filters.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::errors::StoreError;

/// Comparison operator for key filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CompareOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Composable document predicate evaluated against the value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Compare the value at `path` against `value`.
    Key {
        /// Path into the document tree.
        path: Vec<String>,
        /// How to compare.
        op: CompareOp,
        /// Right-hand side of the comparison.
        value: Value,
    },
    /// The value at `path` is present.
    Exists {
        /// Path into the document tree.
        path: Vec<String>,
    },
    /// All sub-filters match.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
    /// Matches every document.
    All,
}

impl Filter {
    /// Key comparison filter.
    #[must_use]
    pub fn key<P, S>(path: P, op: CompareOp, value: Value) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Key {
            path: path.into_iter().map(Into::into).collect(),
            op,
            value,
        }
    }

    /// Equality shorthand.
    #[must_use]
    pub fn eq<P, S>(path: P, value: Value) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::key(path, CompareOp::Eq, value)
    }

    /// Presence filter.
    #[must_use]
    pub fn exists<P, S>(path: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exists {
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Negation.
    #[must_use]
    pub fn not(filter: Self) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Evaluates the filter against a document.
    #[must_use]
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Key { path, op, value } => {
                lookup(doc, path).is_some_and(|found| compare(found, *op, value))
            }
            Self::Exists { path } => lookup(doc, path).is_some(),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Self::Not(filter) => !filter.matches(doc),
            Self::All => true,
        }
    }
}

fn lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(doc, |v, key| v.get(key))
}

fn compare(found: &Value, op: CompareOp, expected: &Value) -> bool {
    let ordering = match (found, expected) {
        (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return false;
            };
            let Some(ordering) = a.partial_cmp(&b) else {
                return false;
            };
            ordering
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => return false,
    };
    match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Lte => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Gte => ordering.is_ge(),
    }
}

/// Sort directive for queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// Path of the sort key. Documents missing the key sort first ascending.
    pub path: Vec<String>,
    /// Descending when true.
    pub desc: bool,
}

impl Sort {
    /// Ascending sort on a path.
    #[must_use]
    pub fn asc<P, S>(path: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            desc: false,
        }
    }

    /// Descending sort on a path.
    #[must_use]
    pub fn desc<P, S>(path: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            desc: true,
        }
    }
}

/// A find query: filter, optional sort, optional limit.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    /// Predicate to match.
    pub filter: Filter,
    /// Result ordering.
    pub sort: Option<Sort>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl FindQuery {
    /// Query matching `filter` with no sort or limit.
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            limit: None,
        }
    }

    /// Sets the sort directive.
    #[must_use]
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// In-place document mutation. Returns whether the document changed; an
/// unchanged document must not be rewritten or counted as modified.
pub type Modifier<'a> = &'a mut dyn FnMut(&mut Value) -> Result<bool, StoreError>;

/// Outcome of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    /// True when the modifier reported a change and the document was written.
    pub modified: bool,
}

/// A named-collection document store.
pub trait DocumentStore: Send + Sync {
    /// Opens an existing collection.
    fn open_collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError>;

    /// Creates a collection, failing if it already exists.
    fn create_collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError>;
}

/// One collection of documents keyed by their `id` field.
pub trait Collection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Starts a read transaction with a stable view.
    fn read_tx(&self) -> Box<dyn ReadTx + '_>;

    /// Starts a write transaction. Dropping it without committing rolls
    /// back every change.
    fn write_tx(&self) -> Box<dyn WriteTx + '_>;
}

/// Read operations over a stable snapshot.
pub trait ReadTx {
    /// Fetches a document by id.
    fn find_id(&self, id: &str) -> Result<Value, StoreError>;

    /// Runs a find query.
    fn find(&self, query: &FindQuery) -> Result<Vec<Value>, StoreError>;

    /// Counts documents matching a filter.
    fn count(&self, filter: &Filter) -> Result<usize, StoreError>;
}

/// Write operations; reads observe the transaction's own writes.
pub trait WriteTx: ReadTx {
    /// Inserts a new document, failing on a duplicate id.
    fn insert(&mut self, doc: Value) -> Result<(), StoreError>;

    /// Applies a modifier to the document with the given id.
    fn update_id(&mut self, id: &str, modifier: Modifier<'_>) -> Result<UpdateResult, StoreError>;

    /// Makes the transaction's changes durable.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_filter_compares_strings_bytewise() {
        let doc = json!({ "_o": { "id": "B" } });
        let gt = Filter::key(["_o", "id"], CompareOp::Gt, json!("A"));
        let lt = Filter::key(["_o", "id"], CompareOp::Lt, json!("A"));
        assert!(gt.matches(&doc));
        assert!(!lt.matches(&doc));
    }

    #[test]
    fn test_missing_key_never_matches_comparison() {
        let doc = json!({ "id": "x" });
        let filter = Filter::eq(["read"], json!(true));
        assert!(!filter.matches(&doc));
        // but its negation does
        assert!(Filter::not(filter).matches(&doc));
    }

    #[test]
    fn test_exists_and_boolean_composition() {
        let doc = json!({ "hasMention": true, "mentionRead": false });
        let filter = Filter::And(vec![
            Filter::eq(["hasMention"], json!(true)),
            Filter::eq(["mentionRead"], json!(false)),
        ]);
        assert!(filter.matches(&doc));
        assert!(Filter::exists(["hasMention"]).matches(&doc));
        assert!(!Filter::exists(["stateId"]).matches(&doc));
        assert!(Filter::All.matches(&doc));
    }

    #[test]
    fn test_or_with_exists_negation() {
        // the state-id gate: missing stateId passes, larger one does not
        let gate = Filter::Or(vec![
            Filter::not(Filter::exists(["stateId"])),
            Filter::key(["stateId"], CompareOp::Lte, json!("s5")),
        ]);
        assert!(gate.matches(&json!({ "id": "a" })));
        assert!(gate.matches(&json!({ "stateId": "s4" })));
        assert!(!gate.matches(&json!({ "stateId": "s6" })));
    }
}
