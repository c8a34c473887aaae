//! Space resolution and object detail lookup contracts.

use crate::domain::entities::Details;
use crate::domain::errors::ChatError;

/// Resolves which space a chat object belongs to.
#[cfg_attr(test, mockall::automock)]
pub trait SpaceIdResolver: Send + Sync {
    /// Space id for the given chat object.
    fn resolve_space_id(&self, object_id: &str) -> Result<String, ChatError>;
}

/// Reads details of objects in a space, such as participants and files.
#[cfg_attr(test, mockall::automock)]
pub trait SpaceIndex: Send + Sync {
    /// Details of the object with the given id.
    fn get_details(&self, id: &str) -> Result<Details, ChatError>;
}
