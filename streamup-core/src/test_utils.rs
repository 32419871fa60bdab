//! Test utilities: a fault-injecting in-memory store
//!
//! `MemoryStore` records every call it receives and can be told to misbehave
//! in the ways real stores do: slow part uploads, request timeouts, hard
//! failures, lagging part listings, mismatched or missing entity tags.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{
    CompletedPart, CompletedUpload, ContentHash, ETag, ListedPart, ObjectOptions, PartInfo,
    PartManifest, RemoteStore, Result, StoreError, Target, UploadId,
};

/// A call received by the store, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    UploadPart { part_number: u32, size: usize },
    ListParts,
    Complete { part_numbers: Vec<u32> },
    Abort,
}

#[derive(Default)]
struct Faults {
    transient: HashMap<u32, usize>,
    permanent: HashSet<u32>,
    missing_etag: HashSet<u32>,
    panicking: HashSet<u32>,
    corrupt_listing: HashSet<u32>,
    repeated_listing: Option<u32>,
    list_lag: usize,
    hide_parts: bool,
    reject_empty_completion: bool,
    missing_object_etag: bool,
    fail_create: bool,
    fail_abort: bool,
}

struct OpenUpload {
    target: Target,
    options: ObjectOptions,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    uploads: HashMap<UploadId, OpenUpload>,
    objects: HashMap<Target, (Vec<u8>, ObjectOptions)>,
    in_flight_parts: HashSet<u32>,
}

/// Tracks concurrent part uploads and the high-water mark
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory `RemoteStore` with fault injection
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    faults: Arc<Mutex<Faults>>,
    in_flight: Arc<InFlight>,
    handles: Arc<AtomicUsize>,
    duplicate_attempts: Arc<AtomicUsize>,
    upload_delay: Duration,
    min_part_size: usize,
}

impl MemoryStore {
    /// A well-behaved store without a minimum part size
    pub fn new() -> Self {
        Self::default()
    }

    /// Every part upload sleeps this long before answering
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn with_min_part_size(mut self, size: usize) -> Self {
        self.min_part_size = size;
        self
    }

    /// The next `times` attempts at `part_number` time out
    pub fn fail_part_transiently(&self, part_number: u32, times: usize) {
        self.faults().transient.insert(part_number, times);
    }

    /// Every attempt at `part_number` fails with a non-retryable error
    pub fn fail_part_permanently(&self, part_number: u32) {
        self.faults().permanent.insert(part_number);
    }

    /// Part uploads for `part_number` succeed but answer without an entity tag
    pub fn drop_part_etag(&self, part_number: u32) {
        self.faults().missing_etag.insert(part_number);
    }

    /// Attempts at `part_number` panic inside the store
    pub fn panic_on_part(&self, part_number: u32) {
        self.faults().panicking.insert(part_number);
    }

    /// Listings report a different entity tag for `part_number`
    pub fn corrupt_listed_etag(&self, part_number: u32) {
        self.faults().corrupt_listing.insert(part_number);
    }

    /// Listings report `part_number` a second time in place of the part after it
    pub fn repeat_listed_part(&self, part_number: u32) {
        self.faults().repeated_listing = Some(part_number);
    }

    /// The next `calls` listings omit the highest part
    pub fn lag_listing(&self, calls: usize) {
        self.faults().list_lag = calls;
    }

    /// Listings never report the highest part
    pub fn hide_listed_parts(&self) {
        self.faults().hide_parts = true;
    }

    /// Completing an upload with no parts is refused
    pub fn reject_empty_completion(&self) {
        self.faults().reject_empty_completion = true;
    }

    /// Completion succeeds but answers without an object entity tag
    pub fn drop_object_etag(&self) {
        self.faults().missing_object_etag = true;
    }

    pub fn fail_create(&self) {
        self.faults().fail_create = true;
    }

    pub fn fail_abort(&self) {
        self.faults().fail_abort = true;
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Create))
    }

    pub fn list_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::ListParts))
    }

    pub fn complete_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Complete { .. }))
    }

    pub fn abort_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::Abort))
    }

    /// Number of upload attempts made for `part_number`
    pub fn part_attempts(&self, part_number: u32) -> usize {
        self.count(|c| matches!(c, Call::UploadPart { part_number: n, .. } if *n == part_number))
    }

    /// Part numbers handed to the last completion, in the order received
    pub fn committed_parts(&self) -> Option<Vec<u32>> {
        self.state().calls.iter().rev().find_map(|c| match c {
            Call::Complete { part_numbers } => Some(part_numbers.clone()),
            _ => None,
        })
    }

    /// Highest number of part uploads observed in flight at once
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak.load(Ordering::SeqCst)
    }

    /// Attempts that started while the same part was already in flight
    pub fn duplicate_attempts(&self) -> usize {
        self.duplicate_attempts.load(Ordering::SeqCst)
    }

    /// Dedicated part handles handed out
    pub fn handles_created(&self) -> usize {
        self.handles.load(Ordering::SeqCst)
    }

    /// Uploads neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Size of each part currently stored for `upload_id`
    pub fn part_sizes(&self, upload_id: &UploadId) -> Vec<usize> {
        self.state()
            .uploads
            .get(upload_id)
            .map(|u| u.parts.values().map(|b| b.len()).collect())
            .unwrap_or_default()
    }

    /// Bytes of a committed object
    pub fn object(&self, target: &Target) -> Option<Vec<u8>> {
        self.state().objects.get(target).map(|(data, _)| data.clone())
    }

    /// Creation options a committed object was stored with
    pub fn object_options(&self, target: &Target) -> Option<ObjectOptions> {
        self.state().objects.get(target).map(|(_, options)| options.clone())
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fault_for_part(&self, part_number: u32) -> Option<StoreError> {
        let mut faults = self.faults();
        if let Some(remaining) = faults.transient.get_mut(&part_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(StoreError::Timeout(format!("part {} timed out", part_number)));
            }
        }
        if faults.permanent.contains(&part_number) {
            return Some(StoreError::Storage(format!("part {} rejected", part_number)));
        }
        None
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_upload(&self, target: &Target, options: &ObjectOptions) -> Result<UploadId> {
        self.record(Call::Create);
        if self.faults().fail_create {
            return Err(StoreError::Storage("create rejected".to_string()));
        }

        let upload_id = UploadId::generate();
        self.state().uploads.insert(
            upload_id.clone(),
            OpenUpload {
                target: target.clone(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        target: &Target,
        upload_id: &UploadId,
        part_number: u32,
        body: Bytes,
    ) -> Result<ETag> {
        {
            let mut state = self.state();
            state.calls.push(Call::UploadPart { part_number, size: body.len() });
            if !state.in_flight_parts.insert(part_number) {
                self.duplicate_attempts.fetch_add(1, Ordering::SeqCst);
            }
        }
        if self.faults().panicking.contains(&part_number) {
            self.state().in_flight_parts.remove(&part_number);
            panic!("store crashed uploading part {}", part_number);
        }
        self.in_flight.enter();

        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }

        let result = match self.fault_for_part(part_number) {
            Some(err) => Err(err),
            None => {
                let etag = ContentHash::new(&body).to_etag();
                let mut state = self.state();
                match state.uploads.get_mut(upload_id).filter(|u| u.target == *target) {
                    Some(upload) => {
                        upload.parts.insert(part_number, body);
                        if self.faults().missing_etag.contains(&part_number) {
                            Ok(ETag::new(""))
                        } else {
                            Ok(etag)
                        }
                    }
                    None => Err(StoreError::NoSuchUpload(upload_id.to_string())),
                }
            }
        };

        self.state().in_flight_parts.remove(&part_number);
        self.in_flight.leave();
        result
    }

    async fn list_parts(&self, target: &Target, upload_id: &UploadId) -> Result<Vec<ListedPart>> {
        self.record(Call::ListParts);

        let mut parts: Vec<ListedPart> = {
            let state = self.state();
            let upload = state
                .uploads
                .get(upload_id)
                .filter(|u| u.target == *target)
                .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
            upload
                .parts
                .iter()
                .map(|(n, body)| ListedPart {
                    part_number: *n,
                    etag: ContentHash::new(body).to_etag(),
                    size: body.len() as u64,
                })
                .collect()
        };

        let mut faults = self.faults();
        if faults.hide_parts || faults.list_lag > 0 {
            faults.list_lag = faults.list_lag.saturating_sub(1);
            parts.pop();
        }
        if let Some(repeated) = faults.repeated_listing {
            let original = parts.iter().find(|p| p.part_number == repeated).cloned();
            if let (Some(original), Some(next)) =
                (original, parts.iter_mut().find(|p| p.part_number == repeated + 1))
            {
                *next = original;
            }
        }
        for part in parts.iter_mut() {
            if faults.corrupt_listing.contains(&part.part_number) {
                part.etag = ETag::new("corrupted");
            }
        }
        Ok(parts)
    }

    async fn complete_upload(
        &self,
        target: &Target,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload> {
        self.record(Call::Complete {
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });

        if parts.is_empty() && self.faults().reject_empty_completion {
            return Err(StoreError::InvalidRequest(
                "upload must contain at least one part".to_string(),
            ));
        }

        let mut state = self.state();
        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.target == *target)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

        let mut data = Vec::new();
        let mut infos = Vec::with_capacity(parts.len());
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(StoreError::InvalidPart("parts out of order".to_string()));
            }
            previous = part.part_number;

            let body = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| StoreError::InvalidPart(format!("part {} missing", part.part_number)))?;
            let hash = ContentHash::new(body);
            if hash.to_etag() != part.etag {
                return Err(StoreError::InvalidPart(format!("part {} etag mismatch", part.part_number)));
            }
            data.extend_from_slice(body);
            infos.push(PartInfo {
                part_number: part.part_number,
                size: body.len() as u64,
                content_hash: hash,
            });
        }

        let manifest = PartManifest::new(infos);
        let size = data.len() as u64;
        let options = upload.options.clone();
        state.uploads.remove(upload_id);
        state.objects.insert(target.clone(), (data, options));

        let etag = if self.faults().missing_object_etag {
            ETag::new("")
        } else {
            manifest.etag()
        };
        Ok(CompletedUpload {
            etag,
            size,
            part_count: parts.len() as u32,
        })
    }

    async fn abort_upload(&self, target: &Target, upload_id: &UploadId) -> Result<()> {
        self.record(Call::Abort);
        if self.faults().fail_abort {
            return Err(StoreError::Storage("abort rejected".to_string()));
        }
        let mut state = self.state();
        match state.uploads.get(upload_id) {
            Some(upload) if upload.target == *target => {
                state.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(StoreError::NoSuchUpload(upload_id.to_string())),
        }
    }

    fn min_part_size(&self) -> usize {
        self.min_part_size
    }

    fn part_handle(&self) -> Option<Arc<dyn RemoteStore>> {
        self.handles.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(self.clone()))
    }
}
