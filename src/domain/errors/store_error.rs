//! Document store error types.

use thiserror::Error;

/// Errors produced by the underlying document store.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("document not found: {id}")]
    DocNotFound { id: String },

    #[error("document already exists: {id}")]
    AlreadyExists { id: String },

    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("store failure: {message}")]
    Internal { message: String },
}

impl StoreError {
    /// Creates an invalid document error.
    #[must_use]
    pub fn invalid_document(reason: impl Into<String>) -> Self {
        Self::InvalidDocument {
            reason: reason.into(),
        }
    }

    /// Creates an internal store error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns whether this error means the document or collection is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::CollectionNotFound { .. } | Self::DocNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_covers_collections_and_documents() {
        assert!(StoreError::CollectionNotFound {
            name: "chats".to_owned()
        }
        .is_not_found());
        assert!(StoreError::DocNotFound {
            id: "m1".to_owned()
        }
        .is_not_found());
        assert!(!StoreError::internal("io failure").is_not_found());
        assert!(!StoreError::invalid_document("missing id").is_not_found());
    }

    #[test]
    fn test_constructors_format_messages() {
        assert_eq!(
            StoreError::internal("io failure").to_string(),
            "store failure: io failure"
        );
        assert_eq!(
            StoreError::invalid_document("missing id").to_string(),
            "invalid document: missing id"
        );
    }
}
