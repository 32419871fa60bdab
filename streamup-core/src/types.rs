//! Core data types for streamup

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Bucket name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(String);

impl BucketId {
    /// Create a new bucket ID with validation
    pub fn new(name: &str) -> crate::Result<Self> {
        if name.is_empty() {
            return Err(crate::StoreError::InvalidBucketName("empty name".to_string()));
        }

        // Alphanumerics, hyphens, underscores and dots only
        if !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.') {
            return Err(crate::StoreError::InvalidBucketName(
                format!("invalid characters in '{}'", name)
            ));
        }

        Ok(BucketId(name.to_string()))
    }

    /// Get the bucket name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key within a bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a new key with validation
    pub fn new(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(crate::StoreError::InvalidKey("empty key".to_string()));
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(crate::StoreError::InvalidKey(
                "control characters not allowed".to_string()
            ));
        }

        Ok(Key(key.to_string()))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Destination of an upload: one object in one bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub bucket: BucketId,
    pub key: Key,
}

impl Target {
    /// Validate and build a target from raw names
    pub fn new(bucket: &str, key: &str) -> crate::Result<Self> {
        Ok(Target {
            bucket: BucketId::new(bucket)?,
            key: Key::new(key)?,
        })
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Attributes fixed when an object is created.
///
/// Sent with `create_upload` only; part, listing, completion and abort
/// requests never carry them. The store keeps them with the committed object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// User metadata, stored verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.metadata.is_empty()
    }

    /// Reject empty content types, empty metadata names and control characters
    pub fn validate(&self) -> crate::Result<()> {
        if let Some(content_type) = &self.content_type {
            if content_type.is_empty() || content_type.chars().any(|c| c.is_control()) {
                return Err(crate::StoreError::InvalidRequest(format!(
                    "invalid content type '{}'",
                    content_type.escape_debug()
                )));
            }
        }
        for (name, value) in &self.metadata {
            if name.is_empty() || name.chars().any(|c| c.is_control() || c.is_whitespace()) {
                return Err(crate::StoreError::InvalidRequest(format!(
                    "invalid metadata name '{}'",
                    name.escape_debug()
                )));
            }
            if value.chars().any(|c| c.is_control()) {
                return Err(crate::StoreError::InvalidRequest(format!(
                    "control characters in metadata '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Identifier of a remote multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(String);

impl UploadId {
    pub fn new(id: impl Into<String>) -> Self {
        UploadId(id.into())
    }

    /// Generate a fresh, time-ordered upload id
    pub fn generate() -> Self {
        UploadId(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty id is a protocol violation from the store
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque entity tag returned by the store for a part or a completed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    pub fn new(tag: impl Into<String>) -> Self {
        ETag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content hash for integrity verification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create hash from data using BLAKE3
    pub fn new(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        ContentHash(hash.into())
    }

    /// Create from existing hash bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ContentHash(bytes)
    }

    /// Get hash as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get hash as hex string
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Entity tag the store hands out for a part with this content
    pub fn to_etag(&self) -> ETag {
        ETag(self.to_hex())
    }
}

/// A part reference handed to `complete_upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: ETag,
}

/// A part as reported by the store's listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedPart {
    pub part_number: u32,
    pub etag: ETag,
    pub size: u64,
}

/// Result of committing a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub etag: ETag,
    pub size: u64,
    pub part_count: u32,
}

/// Information about a part held by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    pub part_number: u32,
    pub size: u64,
    pub content_hash: ContentHash,
}

impl PartInfo {
    pub fn etag(&self) -> ETag {
        self.content_hash.to_etag()
    }
}

/// Server-side state of an in-progress multipart upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipartUploadState {
    pub upload_id: UploadId,
    pub bucket: BucketId,
    pub key: Key,
    pub parts: Vec<PartInfo>,
    #[serde(default)]
    pub options: ObjectOptions,
    pub created_at: SystemTime,
}

impl MultipartUploadState {
    /// Create new multipart upload
    pub fn new(upload_id: UploadId, bucket: BucketId, key: Key) -> Self {
        MultipartUploadState {
            upload_id,
            bucket,
            key,
            parts: Vec::new(),
            options: ObjectOptions::default(),
            created_at: SystemTime::now(),
        }
    }

    pub fn with_options(mut self, options: ObjectOptions) -> Self {
        self.options = options;
        self
    }

    /// Add or replace a part, keeping parts sorted by number
    pub fn add_part(&mut self, part_number: u32, size: u64, hash: ContentHash) {
        self.parts.retain(|p| p.part_number != part_number);
        self.parts.push(PartInfo {
            part_number,
            size,
            content_hash: hash,
        });
        self.parts.sort_by_key(|p| p.part_number);
    }

    pub fn part(&self, part_number: u32) -> Option<&PartInfo> {
        self.parts.iter().find(|p| p.part_number == part_number)
    }

    /// Get total size
    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    pub fn listed_parts(&self) -> Vec<ListedPart> {
        self.parts
            .iter()
            .map(|p| ListedPart {
                part_number: p.part_number,
                etag: p.etag(),
                size: p.size,
            })
            .collect()
    }
}

/// Manifest of the parts an object was assembled from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartManifest {
    pub parts: Vec<PartInfo>,
    pub total_size: u64,
}

impl PartManifest {
    pub fn new(parts: Vec<PartInfo>) -> Self {
        let total_size = parts.iter().map(|p| p.size).sum();
        PartManifest { parts, total_size }
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Multipart entity tag: BLAKE3 over the concatenated part digests, suffixed with the part count
    pub fn etag(&self) -> ETag {
        let mut hasher = blake3::Hasher::new();
        for part in &self.parts {
            hasher.update(part.content_hash.as_bytes());
        }
        ETag(format!("{}-{}", hasher.finalize().to_hex(), self.parts.len()))
    }
}

/// Metadata of a committed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub size: u64,
    pub etag: ETag,
    pub upload_id: UploadId,
    #[serde(default)]
    pub options: ObjectOptions,
    pub created_at: SystemTime,
    pub manifest: PartManifest,
}

impl ObjectMetadata {
    pub fn from_manifest(upload_id: UploadId, manifest: PartManifest, options: ObjectOptions) -> Self {
        ObjectMetadata {
            size: manifest.total_size,
            etag: manifest.etag(),
            upload_id,
            options,
            created_at: SystemTime::now(),
            manifest,
        }
    }
}
