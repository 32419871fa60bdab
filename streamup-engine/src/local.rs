//! `RemoteStore` backed by the local engine

use async_trait::async_trait;
use bytes::Bytes;
use streamup_core::*;

use crate::Storage;

/// Serves the upload contract straight from a local `Storage`
#[derive(Clone)]
pub struct LocalStore {
    storage: Storage,
}

impl LocalStore {
    pub fn new(storage: Storage) -> Self {
        LocalStore { storage }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn create_upload(&self, target: &Target, options: &ObjectOptions) -> Result<UploadId> {
        let state = self.storage.create_upload(&target.bucket, &target.key, options)?;
        Ok(state.upload_id)
    }

    async fn upload_part(
        &self,
        target: &Target,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> Result<ETag> {
        let info = self
            .storage
            .put_part(&target.bucket, &target.key, upload_id, part_number, &body)?;
        Ok(info.etag())
    }

    async fn list_parts(&self, target: &Target, upload_id: &UploadId) -> Result<Vec<ListedPart>> {
        let parts = self.storage.list_parts(&target.bucket, upload_id)?;
        Ok(parts
            .iter()
            .map(|p| ListedPart {
                part_number: p.part_number,
                etag: p.etag(),
                size: p.size,
            })
            .collect())
    }

    async fn complete_upload(
        &self,
        target: &Target,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload> {
        let metadata = self
            .storage
            .complete_upload(&target.bucket, &target.key, upload_id, parts)?;
        Ok(CompletedUpload {
            etag: metadata.etag,
            size: metadata.size,
            part_count: metadata.manifest.part_count() as u32,
        })
    }

    async fn abort_upload(&self, target: &Target, upload_id: &UploadId) -> Result<()> {
        self.storage.abort_upload(&target.bucket, upload_id)
    }

    fn min_part_size(&self) -> usize {
        self.storage.engine().min_part_size()
    }
}
