//! Domain error types.

mod chat_error;
mod store_error;

pub use chat_error::ChatError;
pub use store_error::StoreError;
