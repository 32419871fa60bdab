//! Bucket abstraction over fjall partitions
//!
//! Layout inside a bucket partition:
//! - `upload:{id}` upload state (without parts)
//! - `partinfo:{id}:{n}` part size and digest
//! - `part:{id}:{n}` part bytes, kept after completion as the object's data
//! - `meta:{key}` committed object metadata

use fjall::{Partition, PartitionCreateOptions};
use std::sync::Arc;
use streamup_core::*;
use tracing::debug;

use crate::{storage_error, StorageEngine};

/// Bucket represents a multi-tenant boundary
pub struct Bucket {
    id: BucketId,
    pub(crate) main_partition: Arc<Partition>,
    engine: StorageEngine,
}

impl Bucket {
    /// Create or open bucket
    pub(crate) fn new(engine: StorageEngine, id: BucketId) -> Result<Self> {
        let partition_name = format!("{}_main", id.as_str());

        let main_partition = Arc::new(
            engine
                .keyspace()
                .open_partition(&partition_name, PartitionCreateOptions::default())
                .map_err(storage_error)?,
        );

        Ok(Bucket {
            id,
            main_partition,
            engine,
        })
    }

    /// Get bucket ID
    pub fn id(&self) -> &BucketId {
        &self.id
    }

    /// Start a multipart upload for `key`; `options` are kept for the committed object
    pub fn create_upload(&self, key: &Key, options: &ObjectOptions) -> Result<MultipartUploadState> {
        options.validate()?;
        let state = MultipartUploadState::new(UploadId::generate(), self.id.clone(), key.clone())
            .with_options(options.clone());
        let state_json = serde_json::to_vec(&state)?;

        self.main_partition
            .insert(upload_key(&state.upload_id), state_json)
            .map_err(storage_error)?;
        self.engine.persist()?;

        debug!(bucket = %self.id, key = %key, upload_id = %state.upload_id, "created upload");
        Ok(state)
    }

    /// Load an upload with its parts, if it is still open
    pub fn upload(&self, upload_id: &UploadId) -> Result<Option<MultipartUploadState>> {
        let Some(data) = self.main_partition.get(upload_key(upload_id)).map_err(storage_error)? else {
            return Ok(None);
        };

        let mut state: MultipartUploadState = serde_json::from_slice(&data)?;
        state.parts = self.part_infos(upload_id)?;
        Ok(Some(state))
    }

    /// Store one part, replacing any earlier body with the same number
    pub fn put_part(
        &self,
        upload_id: &UploadId,
        key: &Key,
        part_number: u32,
        data: &[u8],
    ) -> Result<PartInfo> {
        if part_number == 0 {
            return Err(StoreError::InvalidPart("part numbers start at 1".to_string()));
        }
        self.open_upload(upload_id, key)?;

        let info = PartInfo {
            part_number,
            size: data.len() as u64,
            content_hash: ContentHash::new(data),
        };
        let info_json = serde_json::to_vec(&info)?;

        let mut batch = self.engine.keyspace().batch();
        batch.insert(&self.main_partition, part_key(upload_id, part_number), data);
        batch.insert(&self.main_partition, part_info_key(upload_id, part_number), info_json);
        batch.commit().map_err(storage_error)?;
        self.engine.persist()?;

        Ok(info)
    }

    /// Parts stored so far, ascending by number
    pub fn list_parts(&self, upload_id: &UploadId) -> Result<Vec<PartInfo>> {
        let state = self
            .upload(upload_id)?
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        Ok(state.parts)
    }

    /// Assemble the object from the listed parts and close the upload
    pub fn complete(
        &self,
        upload_id: &UploadId,
        key: &Key,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        let state = self.open_upload(upload_id, key)?;

        let mut manifest_parts = Vec::with_capacity(parts.len());
        let mut previous = 0;
        for (index, requested) in parts.iter().enumerate() {
            if requested.part_number <= previous {
                return Err(StoreError::InvalidPart(
                    "part list must be in strictly ascending order".to_string(),
                ));
            }
            previous = requested.part_number;

            let stored = state.part(requested.part_number).ok_or_else(|| {
                StoreError::InvalidPart(format!("part {} was never uploaded", requested.part_number))
            })?;
            if stored.etag() != requested.etag {
                return Err(StoreError::InvalidPart(format!(
                    "etag mismatch for part {}",
                    requested.part_number
                )));
            }

            let is_last = index + 1 == parts.len();
            if !is_last && (stored.size as usize) < self.engine.min_part_size() {
                return Err(StoreError::InvalidPart(format!(
                    "part {} is smaller than the minimum of {} bytes",
                    requested.part_number,
                    self.engine.min_part_size()
                )));
            }
            manifest_parts.push(stored.clone());
        }

        let metadata = ObjectMetadata::from_manifest(
            upload_id.clone(),
            PartManifest::new(manifest_parts),
            state.options.clone(),
        );
        let metadata_json = serde_json::to_vec(&metadata)?;

        let mut batch = self.engine.keyspace().batch();

        // Parts that did not make it into the object
        for stored in &state.parts {
            if metadata.manifest.parts.iter().all(|p| p.part_number != stored.part_number) {
                batch.remove(&self.main_partition, part_key(upload_id, stored.part_number));
            }
            batch.remove(&self.main_partition, part_info_key(upload_id, stored.part_number));
        }

        // Data of the object being replaced
        if let Some(previous) = self.get_metadata(key)? {
            for part in &previous.manifest.parts {
                batch.remove(&self.main_partition, part_key(&previous.upload_id, part.part_number));
            }
        }

        batch.remove(&self.main_partition, upload_key(upload_id));
        batch.insert(&self.main_partition, metadata_key(key), metadata_json);
        batch.commit().map_err(storage_error)?;
        self.engine.persist()?;

        debug!(
            bucket = %self.id,
            key = %key,
            upload_id = %upload_id,
            parts = metadata.manifest.part_count(),
            size = metadata.size,
            "completed upload"
        );
        Ok(metadata)
    }

    /// Drop an open upload and every part stored for it
    pub fn abort(&self, upload_id: &UploadId) -> Result<()> {
        let state = self
            .upload(upload_id)?
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        let mut batch = self.engine.keyspace().batch();
        for part in &state.parts {
            batch.remove(&self.main_partition, part_key(upload_id, part.part_number));
            batch.remove(&self.main_partition, part_info_key(upload_id, part.part_number));
        }
        batch.remove(&self.main_partition, upload_key(upload_id));
        batch.commit().map_err(storage_error)?;
        self.engine.persist()?;

        debug!(bucket = %self.id, upload_id = %upload_id, parts = state.parts.len(), "aborted upload");
        Ok(())
    }

    /// Every upload that is neither completed nor aborted
    pub fn list_uploads(&self) -> Result<Vec<MultipartUploadState>> {
        let mut uploads = Vec::new();
        for item in self.main_partition.prefix(b"upload:") {
            let (_key, value) = item.map_err(storage_error)?;
            let mut state: MultipartUploadState = serde_json::from_slice(&value)?;
            state.parts = self.part_infos(&state.upload_id)?;
            uploads.push(state);
        }
        Ok(uploads)
    }

    /// Get object metadata
    pub fn get_metadata(&self, key: &Key) -> Result<Option<ObjectMetadata>> {
        match self.main_partition.get(metadata_key(key)).map_err(storage_error)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Read a committed object back in part order
    pub fn get_object(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let Some(metadata) = self.get_metadata(key)? else {
            return Ok(None);
        };

        let mut data = Vec::with_capacity(metadata.size as usize);
        for part in &metadata.manifest.parts {
            let body = self
                .main_partition
                .get(part_key(&metadata.upload_id, part.part_number))
                .map_err(storage_error)?
                .ok_or_else(|| {
                    StoreError::Internal(format!("missing data for part {} of {}", part.part_number, key))
                })?;
            data.extend_from_slice(&body);
        }

        Ok(Some(data))
    }

    /// Delete object
    pub fn delete(&self, key: &Key) -> Result<()> {
        let Some(metadata) = self.get_metadata(key)? else {
            return Err(StoreError::NoSuchKey(key.to_string()));
        };

        let mut batch = self.engine.keyspace().batch();
        for part in &metadata.manifest.parts {
            batch.remove(&self.main_partition, part_key(&metadata.upload_id, part.part_number));
        }
        batch.remove(&self.main_partition, metadata_key(key));
        batch.commit().map_err(storage_error)?;
        self.engine.persist()
    }

    /// The upload must exist and belong to `key`
    fn open_upload(&self, upload_id: &UploadId, key: &Key) -> Result<MultipartUploadState> {
        match self.upload(upload_id)? {
            Some(state) if &state.key == key => Ok(state),
            _ => Err(StoreError::NoSuchUpload(upload_id.to_string())),
        }
    }

    fn part_infos(&self, upload_id: &UploadId) -> Result<Vec<PartInfo>> {
        let prefix = format!("partinfo:{}:", upload_id);
        let mut parts = Vec::new();
        for item in self.main_partition.prefix(prefix.as_bytes()) {
            let (_key, value) = item.map_err(storage_error)?;
            parts.push(serde_json::from_slice::<PartInfo>(&value)?);
        }
        // Zero-padded part numbers already sort correctly
        Ok(parts)
    }
}

// Helper functions for key formatting
fn upload_key(upload_id: &UploadId) -> Vec<u8> {
    format!("upload:{}", upload_id).into_bytes()
}

fn part_key(upload_id: &UploadId, part_number: u32) -> Vec<u8> {
    format!("part:{}:{:010}", upload_id, part_number).into_bytes()
}

fn part_info_key(upload_id: &UploadId, part_number: u32) -> Vec<u8> {
    format!("partinfo:{}:{:010}", upload_id, part_number).into_bytes()
}

fn metadata_key(key: &Key) -> Vec<u8> {
    format!("meta:{}", key.as_str()).into_bytes()
}
