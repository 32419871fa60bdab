//! Streaming multipart uploads
//!
//! Reads a byte stream, cuts it into parts, uploads up to N parts at once
//! with timeout retries, waits for the store to list every part, checks the
//! entity tags and commits. Any failure after the remote upload exists
//! aborts it.

pub mod chunker;
pub mod error;
pub mod events;
pub mod http;
pub mod options;
pub mod part;
pub mod stats;
pub mod upload;

mod reconciler;
mod scheduler;
mod session;

pub use chunker::Chunker;
pub use error::UploadError;
pub use events::{SessionState, UploadEvent};
pub use http::HttpStore;
pub use options::UploadOptions;
pub use part::{Part, PartStatus, UploadedParts};
pub use stats::UploadStats;
pub use upload::{CompletionCallback, StreamingUpload, StreamingUploadBuilder, UploadHandle, UploadSummary};

pub type Result<T> = std::result::Result<T, UploadError>;
