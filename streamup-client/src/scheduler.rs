//! Bounded pool of part uploads with timeout retries

use std::any::Any;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use streamup_core::{ETag, RemoteStore, StoreError, Target, UploadId};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::part::{Part, PartStatus, UploadedParts};
use crate::UploadError;

/// One finished attempt, handed back with its part
pub(crate) struct AttemptOutcome {
    part: Part,
    result: Result<ETag, StoreError>,
}

/// What became of a settled attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Settled {
    Uploaded { part_number: u32, etag: ETag, size: usize },
    Retrying { part_number: u32, attempts: u32 },
}

/// Keeps up to `limit` part uploads running for one remote upload
pub(crate) struct UploadScheduler {
    store: Arc<dyn RemoteStore>,
    target: Target,
    upload_id: UploadId,
    limit: usize,
    retries: u32,
    pending: VecDeque<Part>,
    in_flight: BTreeSet<u32>,
    tasks: JoinSet<AttemptOutcome>,
    uploaded: UploadedParts,
}

impl UploadScheduler {
    pub(crate) fn new(
        store: Arc<dyn RemoteStore>,
        target: Target,
        upload_id: UploadId,
        limit: usize,
        retries: u32,
    ) -> Self {
        UploadScheduler {
            store,
            target,
            upload_id,
            limit,
            retries,
            pending: VecDeque::new(),
            in_flight: BTreeSet::new(),
            tasks: JoinSet::new(),
            uploaded: UploadedParts::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, part: Part) {
        self.pending.push_back(part);
    }

    /// Start attempts until the pool is full or nothing is pending
    pub(crate) fn fill(&mut self) {
        while self.tasks.len() < self.limit {
            let Some(mut part) = self.pending.pop_front() else {
                break;
            };

            let store = part
                .handle
                .get_or_insert_with(|| self.store.part_handle().unwrap_or_else(|| self.store.clone()))
                .clone();
            part.attempts += 1;
            self.in_flight.insert(part.number);
            debug!(part_number = part.number, attempt = part.attempts, "Uploading part");

            let target = self.target.clone();
            let upload_id = self.upload_id.clone();
            self.tasks.spawn(async move {
                let result = store
                    .upload_part(&target, &upload_id, part.number, part.payload.clone())
                    .await;
                AttemptOutcome { part, result }
            });
        }
    }

    /// Wait for the next attempt to finish; `None` when nothing is in flight
    pub(crate) async fn join_next(&mut self) -> Option<Result<AttemptOutcome, JoinError>> {
        self.tasks.join_next().await
    }

    /// Fold a finished attempt into the record, or schedule its retry
    pub(crate) fn settle(
        &mut self,
        joined: Result<AttemptOutcome, JoinError>,
    ) -> Result<Settled, UploadError> {
        let AttemptOutcome { part, result } = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!(panic = %message, "Part upload task panicked");
                return Err(UploadError::Panicked(message));
            }
            Err(_) => return Err(UploadError::Interrupted),
        };
        self.in_flight.remove(&part.number);

        match result {
            Ok(etag) if etag.is_empty() => Err(UploadError::Protocol(format!(
                "store returned no entity tag for part {}",
                part.number
            ))),
            Ok(etag) => {
                self.uploaded.record(part.number, etag.clone())?;
                Ok(Settled::Uploaded {
                    part_number: part.number,
                    etag,
                    size: part.size(),
                })
            }
            Err(e) if e.is_transient() && part.attempts <= self.retries => {
                warn!(
                    part_number = part.number,
                    attempts = part.attempts,
                    error = %e,
                    "Part upload timed out, retrying"
                );
                let settled = Settled::Retrying {
                    part_number: part.number,
                    attempts: part.attempts,
                };
                self.pending.push_back(part);
                Ok(settled)
            }
            Err(e) => Err(UploadError::PartFailed {
                part_number: part.number,
                attempts: part.attempts,
                source: e,
            }),
        }
    }

    pub(crate) fn status(&self, part_number: u32) -> Option<PartStatus> {
        if self.uploaded.contains(part_number) {
            Some(PartStatus::Done)
        } else if self.in_flight.contains(&part_number) {
            Some(PartStatus::InFlight)
        } else if self.pending.iter().any(|p| p.number == part_number) {
            Some(PartStatus::Pending)
        } else {
            None
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn has_in_flight(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Nothing pending and nothing in flight
    pub(crate) fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.tasks.is_empty()
    }

    pub(crate) fn uploaded(&self) -> &UploadedParts {
        &self.uploaded
    }

    /// Drop pending parts and wait out in-flight attempts, discarding their results
    pub(crate) async fn shutdown(&mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        let mut discarded = 0usize;
        while self.tasks.join_next().await.is_some() {
            discarded += 1;
        }
        self.in_flight.clear();
        debug!(dropped, discarded, "Part scheduler shut down");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
