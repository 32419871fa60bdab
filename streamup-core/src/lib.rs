//! Core data models, errors and the remote store contract for streamup

pub mod auth;
pub mod error;
pub mod store;
pub mod types;

mod hex;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::*;
pub use store::*;
pub use types::*;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
