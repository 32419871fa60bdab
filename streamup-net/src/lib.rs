//! HTTP wire protocol shared by the streamup server and client
//!
//! - `protocol`: routes, query parameters and path encoding
//! - `wire`: JSON bodies and the status code to error mapping

pub mod protocol;
pub mod wire;

pub use protocol::*;
pub use wire::*;

/// Prefix of every object route
pub const API_PREFIX: &str = "/v1/";

/// Liveness endpoint
pub const HEALTH_PATH: &str = "/health";

/// Value of the `server` header on every response
pub const SERVER_NAME: &str = concat!("streamup/", env!("CARGO_PKG_VERSION"));

/// Request signing headers
pub const HEADER_KEY: &str = "x-streamup-key";
pub const HEADER_SIGNATURE: &str = "x-streamup-signature";
pub const HEADER_TIMESTAMP: &str = "x-streamup-timestamp";
pub const HEADER_NONCE: &str = "x-streamup-nonce";

/// Prefix of the response headers carrying an object's user metadata
pub const HEADER_META_PREFIX: &str = "x-streamup-meta-";

/// Query parameters of the multipart API
pub const QUERY_UPLOADS: &str = "uploads";
pub const QUERY_UPLOAD_ID: &str = "uploadId";
pub const QUERY_PART_NUMBER: &str = "partNumber";
