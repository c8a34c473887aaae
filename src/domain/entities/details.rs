//! Detail records attached to events as message dependencies.

use std::collections::BTreeMap;

use serde_json::Value;

/// A flat id-plus-fields record describing an object a message depends on,
/// such as its creator's participant object or an attachment target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details {
    id: String,
    fields: BTreeMap<String, Value>,
}

impl Details {
    /// Creates an empty record for the given object id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field, replacing any previous value under the same key.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Object id this record describes.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Looks up a field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// True when the record carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_with_field_replaces_previous_value() {
        let details = Details::new("obj1")
            .with_field("name", json!("a"))
            .with_field("name", json!("b"));
        assert_eq!(details.get("name"), Some(&json!("b")));
        assert_eq!(details.len(), 1);
        assert_eq!(details.id(), "obj1");
    }
}
