//! Notifications published while an upload runs

use serde::Serialize;
use streamup_core::ETag;

use crate::stats::UploadStats;

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Initiating,
    Streaming,
    Draining,
    Reconciling,
    Committing,
    Finished,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum UploadEvent {
    /// A fragment was read from the source
    Progress { bytes_read: u64, fragment: usize },
    PartUploaded { part_number: u32, etag: ETag, size: usize },
    /// Every part is uploaded; waiting for the store to list them all
    AwaitingAcknowledgement { stats: UploadStats },
    Finished { etag: ETag, stats: UploadStats },
    Failed { message: String },
}
