//! Error types for streamup stores

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("No such upload: {0}")]
    NoSuchUpload(String),

    #[error("No such key: {0}")]
    NoSuchKey(String),

    #[error("Invalid part: {0}")]
    InvalidPart(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Replay attack detected")]
    ReplayAttack,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Request-timeout class errors are the only ones worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }

    /// Short machine-readable code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Timeout(_) => "RequestTimeout",
            StoreError::NoSuchUpload(_) => "NoSuchUpload",
            StoreError::NoSuchKey(_) => "NoSuchKey",
            StoreError::InvalidPart(_) => "InvalidPart",
            StoreError::InvalidRequest(_)
            | StoreError::InvalidBucketName(_)
            | StoreError::InvalidKey(_) => "InvalidRequest",
            StoreError::AuthenticationFailed(_)
            | StoreError::InvalidSignature
            | StoreError::ReplayAttack => "AccessDenied",
            _ => "InternalError",
        }
    }
}
