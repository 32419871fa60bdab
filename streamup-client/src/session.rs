//! The upload state machine
//!
//! A session owns the source, the part queue and the uploaded-part record.
//! Every state change and every mutation of the record happens on the task
//! running [`Session::run`]; part uploads only report back to it.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io;
use std::sync::Arc;
use streamup_core::{CompletedPart, CompletedUpload, ObjectOptions, RemoteStore, Target, UploadId};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument};

use crate::chunker::Chunker;
use crate::events::{SessionState, UploadEvent};
use crate::options::UploadOptions;
use crate::part::PartStatus;
use crate::reconciler::Reconciler;
use crate::scheduler::{AttemptOutcome, Settled, UploadScheduler};
use crate::stats::StatsCollector;
use crate::upload::{CompletionCallback, UploadSummary};
use crate::UploadError;

pub(crate) type ByteSource = BoxStream<'static, io::Result<Bytes>>;

enum Step {
    Fragment(Option<io::Result<Bytes>>),
    Attempt(Result<AttemptOutcome, JoinError>),
    Idle,
}

pub(crate) struct Session {
    store: Arc<dyn RemoteStore>,
    target: Target,
    object: ObjectOptions,
    source: Option<ByteSource>,
    options: UploadOptions,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<UploadEvent>,
    stats: StatsCollector,
    chunker: Chunker,
    upload_id: Option<UploadId>,
    scheduler: Option<UploadScheduler>,
    callback: Option<CompletionCallback>,
}

impl Session {
    pub(crate) fn new(
        store: Arc<dyn RemoteStore>,
        target: Target,
        source: ByteSource,
        options: UploadOptions,
        state: watch::Sender<SessionState>,
        events: broadcast::Sender<UploadEvent>,
        callback: Option<CompletionCallback>,
    ) -> Result<Self, UploadError> {
        let chunker = Chunker::new(options.max_part_size)?;
        Ok(Session {
            store,
            target,
            object: ObjectOptions::default(),
            source: Some(source),
            options,
            state,
            events,
            stats: StatsCollector::start(),
            chunker,
            upload_id: None,
            scheduler: None,
            callback,
        })
    }

    /// Attributes for the object, sent when the upload is created
    pub(crate) fn with_object_options(mut self, object: ObjectOptions) -> Self {
        self.object = object;
        self
    }

    /// Drive the upload to a terminal state and report it once
    pub(crate) async fn run(mut self) -> Result<UploadSummary, UploadError> {
        self.stats = StatsCollector::start();

        let result = match self.drive().await {
            Ok(summary) => {
                self.transition(SessionState::Finished);
                info!(
                    target_object = %self.target,
                    etag = %summary.etag,
                    size = summary.size,
                    parts = summary.parts,
                    "Upload finished"
                );
                self.emit(UploadEvent::Finished {
                    etag: summary.etag.clone(),
                    stats: summary.stats.clone(),
                });
                Ok(summary)
            }
            Err(cause) => {
                self.transition(SessionState::Failed);
                let err = self.teardown(cause).await;
                error!(target_object = %self.target, error = %err, "Upload failed");
                self.emit(UploadEvent::Failed {
                    message: err.to_string(),
                });
                Err(err)
            }
        };

        if let Some(callback) = self.callback.take() {
            callback(&result);
        }
        result
    }

    async fn drive(&mut self) -> Result<UploadSummary, UploadError> {
        self.transition(SessionState::Initiating);
        let upload_id = self.initiate().await?;
        self.scheduler = Some(UploadScheduler::new(
            self.store.clone(),
            self.target.clone(),
            upload_id.clone(),
            self.options.concurrent_parts,
            self.options.retries,
        ));

        self.transition(SessionState::Streaming);
        self.stream_parts().await?;

        let stats = self.stats.snapshot();
        debug!(parts = stats.parts, bytes = stats.bytes_uploaded, "All parts uploaded");
        self.emit(UploadEvent::AwaitingAcknowledgement { stats });

        self.transition(SessionState::Reconciling);
        let expected = self.chunker.parts_cut() as usize;
        let parts = {
            let uploaded = match self.scheduler.as_ref() {
                Some(scheduler) => scheduler.uploaded().clone(),
                None => return Err(UploadError::Protocol("part scheduler missing".to_string())),
            };
            Reconciler::new(self.store.as_ref(), &self.target, &upload_id)
                .with_timing(
                    self.options.settle_delay,
                    self.options.effective_poll_interval(),
                    self.options.ack_deadline(),
                )
                .reconcile(&uploaded, expected)
                .await?
        };

        self.transition(SessionState::Committing);
        let completed = self.commit(&upload_id, &parts).await?;

        Ok(UploadSummary {
            upload_id,
            etag: completed.etag,
            size: completed.size,
            parts: completed.part_count,
            stats: self.stats.snapshot(),
        })
    }

    #[instrument(skip(self), fields(target_object = %self.target))]
    async fn initiate(&mut self) -> Result<UploadId, UploadError> {
        let upload_id = self.store.create_upload(&self.target, &self.object).await?;
        if upload_id.is_empty() {
            return Err(UploadError::Protocol("store returned an empty upload id".to_string()));
        }
        debug!(upload_id = %upload_id, "Upload created");
        self.upload_id = Some(upload_id.clone());
        Ok(upload_id)
    }

    /// Pull the source into parts and upload them until both run dry
    async fn stream_parts(&mut self) -> Result<(), UploadError> {
        let limit = self.options.concurrent_parts;

        loop {
            let step = {
                let Some(scheduler) = self.scheduler.as_mut() else {
                    return Err(UploadError::Protocol("part scheduler missing".to_string()));
                };
                scheduler.fill();
                if self.source.is_none() && scheduler.is_idle() {
                    break;
                }

                let reading = self.source.is_some() && scheduler.pending_len() < limit;
                let uploading = scheduler.has_in_flight();
                let source = &mut self.source;

                tokio::select! {
                    biased;
                    Some(joined) = scheduler.join_next(), if uploading => Step::Attempt(joined),
                    fragment = next_fragment(source), if reading => Step::Fragment(fragment),
                    else => Step::Idle,
                }
            };

            match step {
                Step::Fragment(Some(Ok(fragment))) => self.accept_fragment(fragment),
                Step::Fragment(Some(Err(e))) => return Err(UploadError::Stream(e)),
                Step::Fragment(None) => self.end_of_stream(),
                Step::Attempt(joined) => self.settle_attempt(joined)?,
                Step::Idle => break,
            }
        }
        Ok(())
    }

    fn accept_fragment(&mut self, fragment: Bytes) {
        self.stats.read(fragment.len());
        self.emit(UploadEvent::Progress {
            bytes_read: self.stats.snapshot().bytes_read,
            fragment: fragment.len(),
        });

        let parts = self.chunker.push(&fragment);
        if let Some(scheduler) = self.scheduler.as_mut() {
            for part in parts {
                debug!(part_number = part.number, size = part.size(), "Part cut");
                scheduler.enqueue(part);
            }
        }
    }

    fn end_of_stream(&mut self) {
        self.source = None;
        if let Some(part) = self.chunker.finish() {
            debug!(part_number = part.number, size = part.size(), "Final part cut");
            if let Some(scheduler) = self.scheduler.as_mut() {
                scheduler.enqueue(part);
            }
        }
        self.transition(SessionState::Draining);
    }

    fn settle_attempt(&mut self, joined: Result<AttemptOutcome, JoinError>) -> Result<(), UploadError> {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return Err(UploadError::Protocol("part scheduler missing".to_string()));
        };

        match scheduler.settle(joined)? {
            Settled::Uploaded { part_number, etag, size } => {
                debug_assert_eq!(scheduler.status(part_number), Some(PartStatus::Done));
                self.stats.uploaded(size);
                self.emit(UploadEvent::PartUploaded { part_number, etag, size });
            }
            Settled::Retrying { .. } => self.stats.retried(),
        }
        Ok(())
    }

    #[instrument(skip_all, fields(upload_id = %upload_id, parts = parts.len()))]
    async fn commit(
        &mut self,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload, UploadError> {
        let completed = self.store.complete_upload(&self.target, upload_id, parts).await?;
        if completed.etag.is_empty() {
            return Err(UploadError::Protocol("store completed the upload without an entity tag".to_string()));
        }
        Ok(completed)
    }

    /// Release everything the failed session holds; returns the error to report
    async fn teardown(&mut self, cause: UploadError) -> UploadError {
        self.source = None;
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }

        let Some(upload_id) = self.upload_id.clone() else {
            return cause;
        };
        self.abort(&upload_id, cause).await
    }

    #[instrument(skip_all, fields(upload_id = %upload_id))]
    async fn abort(&mut self, upload_id: &UploadId, cause: UploadError) -> UploadError {
        match self.store.abort_upload(&self.target, upload_id).await {
            Ok(()) => {
                debug!("Upload aborted");
                cause
            }
            Err(source) => UploadError::AbortFailed {
                source,
                cause: Box::new(cause),
            },
        }
    }

    /// Move to `next` unless a terminal state was already reached
    fn transition(&self, next: SessionState) {
        let current = *self.state.borrow();
        if current.is_terminal() {
            debug!(?current, ?next, "Ignoring transition out of terminal state");
            return;
        }
        debug!(from = ?current, to = ?next, "Session state");
        self.state.send_replace(next);
    }

    fn emit(&self, event: UploadEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn next_fragment(source: &mut Option<ByteSource>) -> Option<io::Result<Bytes>> {
    match source {
        Some(stream) => stream.next().await,
        None => None,
    }
}
