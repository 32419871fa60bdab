//! The remote store contract required by the upload manager

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::{CompletedPart, CompletedUpload, ETag, ListedPart, ObjectOptions, Result, Target, UploadId};

/// Smallest non-final part most multipart stores accept (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// A multipart-capable object store.
///
/// Every operation is scoped to one bucket/key target. Implementations report
/// request timeouts as [`StoreError::Timeout`](crate::StoreError::Timeout) so
/// callers can tell them apart from permanent failures.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Start a multipart upload and return its id.
    ///
    /// `options` apply to the object the upload will become.
    async fn create_upload(&self, target: &Target, options: &ObjectOptions) -> Result<UploadId>;

    /// Upload one part and return the part's entity tag
    async fn upload_part(
        &self,
        target: &Target,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> Result<ETag>;

    /// Parts the store has acknowledged so far, ascending by part number
    async fn list_parts(&self, target: &Target, upload_id: &UploadId) -> Result<Vec<ListedPart>>;

    /// Assemble the object from `parts`, which must be in ascending order
    async fn complete_upload(
        &self,
        target: &Target,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload>;

    /// Release every resource held by the upload
    async fn abort_upload(&self, target: &Target, upload_id: &UploadId) -> Result<()>;

    /// Minimum size of a non-final part
    fn min_part_size(&self) -> usize {
        MIN_PART_SIZE
    }

    /// A handle dedicated to one part, reused across that part's retries.
    ///
    /// `None` means the part shares the session's handle.
    fn part_handle(&self) -> Option<Arc<dyn RemoteStore>> {
        None
    }
}
