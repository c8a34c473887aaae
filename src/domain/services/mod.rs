//! Domain services.

mod order_keys;

pub use order_keys::{DenseKeyGenerator, OrderKeyGenerator};
