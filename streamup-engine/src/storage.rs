//! High-level storage operations

use streamup_core::*;
use crate::StorageEngine;

/// High-level storage interface addressed by bucket name
#[derive(Clone)]
pub struct Storage {
    engine: StorageEngine,
}

impl Storage {
    /// Create new storage instance
    pub fn new(engine: StorageEngine) -> Self {
        Storage { engine }
    }

    pub fn create_upload(
        &self,
        bucket_id: &BucketId,
        key: &Key,
        options: &ObjectOptions,
    ) -> Result<MultipartUploadState> {
        self.engine.bucket(bucket_id)?.create_upload(key, options)
    }

    pub fn put_part(
        &self,
        bucket_id: &BucketId,
        key: &Key,
        upload_id: &UploadId,
        part_number: u32,
        data: &[u8],
    ) -> Result<PartInfo> {
        self.engine.bucket(bucket_id)?.put_part(upload_id, key, part_number, data)
    }

    pub fn list_parts(&self, bucket_id: &BucketId, upload_id: &UploadId) -> Result<Vec<PartInfo>> {
        self.engine.bucket(bucket_id)?.list_parts(upload_id)
    }

    pub fn complete_upload(
        &self,
        bucket_id: &BucketId,
        key: &Key,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        self.engine.bucket(bucket_id)?.complete(upload_id, key, parts)
    }

    pub fn abort_upload(&self, bucket_id: &BucketId, upload_id: &UploadId) -> Result<()> {
        self.engine.bucket(bucket_id)?.abort(upload_id)
    }

    /// Uploads in progress in a bucket
    pub fn list_uploads(&self, bucket_id: &BucketId) -> Result<Vec<MultipartUploadState>> {
        self.engine.bucket(bucket_id)?.list_uploads()
    }

    /// Get object data
    pub fn get_object(&self, bucket_id: &BucketId, key: &Key) -> Result<Option<Vec<u8>>> {
        self.engine.bucket(bucket_id)?.get_object(key)
    }

    /// Get object metadata
    pub fn get_metadata(&self, bucket_id: &BucketId, key: &Key) -> Result<Option<ObjectMetadata>> {
        self.engine.bucket(bucket_id)?.get_metadata(key)
    }

    /// Delete object
    pub fn delete_object(&self, bucket_id: &BucketId, key: &Key) -> Result<()> {
        self.engine.bucket(bucket_id)?.delete(key)
    }

    /// Get storage engine reference
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_roundtrip() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let storage = Storage::new(engine.with_min_part_size(0));

        let bucket_id = BucketId::new("test-bucket").unwrap();
        let key = Key::new("test-key").unwrap();

        let upload = storage.create_upload(&bucket_id, &key, &ObjectOptions::default()).unwrap();
        assert_eq!(storage.list_uploads(&bucket_id).unwrap().len(), 1);

        let part = storage
            .put_part(&bucket_id, &key, &upload.upload_id, 1, b"Hello, storage layer!")
            .unwrap();
        let parts = vec![CompletedPart { part_number: 1, etag: part.etag() }];
        let metadata = storage
            .complete_upload(&bucket_id, &key, &upload.upload_id, &parts)
            .unwrap();
        assert_eq!(metadata.size, 21);

        let retrieved = storage.get_object(&bucket_id, &key).unwrap().unwrap();
        assert_eq!(retrieved, b"Hello, storage layer!");

        let retrieved_metadata = storage.get_metadata(&bucket_id, &key).unwrap().unwrap();
        assert_eq!(retrieved_metadata.etag, metadata.etag);
        assert!(storage.list_uploads(&bucket_id).unwrap().is_empty());
    }

    #[test]
    fn test_buckets_are_isolated() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let storage = Storage::new(engine);

        let first = BucketId::new("first").unwrap();
        let second = BucketId::new("second").unwrap();
        let key = Key::new("shared-key").unwrap();

        let upload = storage.create_upload(&first, &key, &ObjectOptions::default()).unwrap();
        assert!(matches!(
            storage.list_parts(&second, &upload.upload_id),
            Err(StoreError::NoSuchUpload(_))
        ));
        assert!(storage.list_uploads(&second).unwrap().is_empty());
    }

    #[test]
    fn test_replacing_object_keeps_latest() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let storage = Storage::new(engine.with_min_part_size(0));

        let bucket_id = BucketId::new("test-bucket").unwrap();
        let key = Key::new("test-key").unwrap();

        for body in [&b"old contents"[..], &b"new"[..]] {
            let upload = storage.create_upload(&bucket_id, &key, &ObjectOptions::default()).unwrap();
            let part = storage.put_part(&bucket_id, &key, &upload.upload_id, 1, body).unwrap();
            let parts = vec![CompletedPart { part_number: 1, etag: part.etag() }];
            storage.complete_upload(&bucket_id, &key, &upload.upload_id, &parts).unwrap();
        }

        assert_eq!(storage.get_object(&bucket_id, &key).unwrap().unwrap(), b"new");
    }
}
