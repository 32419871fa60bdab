//! Upload error types

use std::time::Duration;
use streamup_core::{ETag, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Missing target or source, or unusable options; raised before any network call
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store answered without an upload id, entity tag or part list
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Part {part_number} failed after {attempts} attempt(s): {source}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("Consistency failure on part {part_number}: store reports {remote}, recorded {local}")]
    Consistency {
        part_number: u32,
        local: String,
        remote: ETag,
    },

    #[error("Store acknowledged {acknowledged} of {expected} part(s) within {waited:?}")]
    AckTimeout {
        waited: Duration,
        acknowledged: usize,
        expected: usize,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source stream error: {0}")]
    Stream(#[source] std::io::Error),

    /// Aborting the remote upload failed; `cause` is what triggered the abort
    #[error("Abort failed: {source} (after: {cause})")]
    AbortFailed {
        #[source]
        source: StoreError,
        cause: Box<UploadError>,
    },

    /// A part upload task panicked; the upload is torn down like any other failure
    #[error("Part upload panicked: {0}")]
    Panicked(String),

    /// The upload task stopped before reaching a terminal state
    #[error("Upload interrupted")]
    Interrupted,
}

impl UploadError {
    /// The failure that ended the upload, looking past a failed abort
    pub fn root_cause(&self) -> &UploadError {
        match self {
            UploadError::AbortFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
