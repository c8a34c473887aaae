//! Chat engine error types.

use thiserror::Error;

use super::StoreError;

/// Errors surfaced by the chat repository and subscription layer.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ChatError {
    #[error("invalid message: {reason}")]
    Invalid { reason: String },

    #[error("repository error: {0}")]
    Repo(#[from] StoreError),

    #[error("order key space exhausted between neighbouring keys")]
    OrderSpaceExhausted,

    #[error("space id not resolvable for object: {object_id}")]
    SpaceNotFound { object_id: String },

    #[error("event transport failure: {message}")]
    Transport { message: String },
}

impl ChatError {
    /// Creates a validation error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns whether this error means a missing entity rather than a failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::SpaceNotFound { .. } => true,
            Self::Repo(err) => err.is_not_found(),
            _ => false,
        }
    }

    /// Returns whether the caller may retry the operation.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Repo(StoreError::Internal { .. })
        )
    }
}
