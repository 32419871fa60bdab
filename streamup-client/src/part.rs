//! Parts and the record of uploaded parts

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use streamup_core::{CompletedPart, ETag, RemoteStore};

use crate::UploadError;

/// One cut of the input, numbered from 1 in input order
#[derive(Clone)]
pub struct Part {
    pub number: u32,
    pub payload: Bytes,
    /// Attempts started so far
    pub attempts: u32,
    /// The last part of the stream, allowed to be undersized
    pub is_final: bool,
    /// Store handle reused by every attempt at this part, assigned on first dispatch
    pub(crate) handle: Option<Arc<dyn RemoteStore>>,
}

impl Part {
    pub fn new(number: u32, payload: Bytes, is_final: bool) -> Self {
        Part {
            number,
            payload,
            attempts: 0,
            is_final,
            handle: None,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part")
            .field("number", &self.number)
            .field("size", &self.payload.len())
            .field("attempts", &self.attempts)
            .field("is_final", &self.is_final)
            .finish()
    }
}

/// Where a part is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    InFlight,
    Done,
}

/// Part number to entity tag, for every part the store has accepted
#[derive(Debug, Default, Clone)]
pub struct UploadedParts {
    etags: BTreeMap<u32, ETag>,
}

impl UploadedParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a part's entity tag; each part number is recorded once
    pub fn record(&mut self, part_number: u32, etag: ETag) -> Result<(), UploadError> {
        if self.etags.contains_key(&part_number) {
            return Err(UploadError::Protocol(format!(
                "part {} uploaded twice",
                part_number
            )));
        }
        self.etags.insert(part_number, etag);
        Ok(())
    }

    pub fn get(&self, part_number: u32) -> Option<&ETag> {
        self.etags.get(&part_number)
    }

    pub fn contains(&self, part_number: u32) -> bool {
        self.etags.contains_key(&part_number)
    }

    pub fn len(&self) -> usize {
        self.etags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.etags.is_empty()
    }

    /// Every recorded part in ascending order
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        self.etags
            .iter()
            .map(|(n, etag)| CompletedPart {
                part_number: *n,
                etag: etag.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_rejects_duplicates() {
        let mut uploaded = UploadedParts::new();
        uploaded.record(2, ETag::new("b")).unwrap();
        uploaded.record(1, ETag::new("a")).unwrap();

        assert!(matches!(uploaded.record(2, ETag::new("c")), Err(UploadError::Protocol(_))));
        assert_eq!(uploaded.get(2), Some(&ETag::new("b")));
        assert_eq!(uploaded.len(), 2);
    }

    #[test]
    fn test_completed_parts_are_ordered() {
        let mut uploaded = UploadedParts::new();
        for n in [3, 1, 2] {
            uploaded.record(n, ETag::new(format!("etag-{}", n))).unwrap();
        }

        let parts = uploaded.completed_parts();
        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(parts[0].etag, ETag::new("etag-1"));
    }
}
