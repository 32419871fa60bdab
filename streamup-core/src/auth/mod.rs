//! Request authentication
//!
//! - Ed25519 credentials held by clients
//! - Canonical request signing with replay protection

pub mod keys;
pub mod canonical;

pub use keys::*;
pub use canonical::*;
