//! Multipart object store built on fjall

use fjall::{Config, Keyspace, PersistMode};
use std::path::Path;
use std::sync::Arc;
use streamup_core::*;

pub mod bucket;
pub mod local;
pub mod storage;

pub use bucket::*;
pub use local::*;
pub use storage::*;

/// Storage engine wrapping fjall keyspace
#[derive(Clone)]
pub struct StorageEngine {
    keyspace: Arc<Keyspace>,
    min_part_size: usize,
}

impl StorageEngine {
    /// Create new storage engine at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::new(path);
        let keyspace = Arc::new(config.open().map_err(storage_error)?);

        Ok(StorageEngine {
            keyspace,
            min_part_size: MIN_PART_SIZE,
        })
    }

    /// Override the smallest size accepted for a non-final part
    pub fn with_min_part_size(mut self, min_part_size: usize) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Create temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    /// Create or get bucket
    pub fn bucket(&self, bucket_id: &BucketId) -> Result<Bucket> {
        Bucket::new(self.clone(), bucket_id.clone())
    }

    /// Get the underlying keyspace
    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn min_part_size(&self) -> usize {
        self.min_part_size
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(storage_error)
    }
}

pub(crate) fn storage_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_engine_creation() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        assert_eq!(engine.min_part_size(), MIN_PART_SIZE);

        let engine = engine.with_min_part_size(1024);
        assert_eq!(engine.min_part_size(), 1024);
    }

    #[test]
    fn test_bucket_creation() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let bucket_id = BucketId::new("test-bucket").unwrap();
        let bucket = engine.bucket(&bucket_id).unwrap();
        assert_eq!(bucket.id(), &bucket_id);
    }
}
