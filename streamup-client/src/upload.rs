//! Public entry point: build, observe and start a streaming upload

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use streamup_core::{ETag, ObjectOptions, RemoteStore, Target, UploadId};
use tokio::io::AsyncRead;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;

use crate::events::{SessionState, UploadEvent};
use crate::options::UploadOptions;
use crate::session::{ByteSource, Session};
use crate::stats::UploadStats;
use crate::{Result, UploadError};

/// Called exactly once with the terminal outcome
pub type CompletionCallback = Box<dyn FnOnce(&Result<UploadSummary>) + Send + 'static>;

const EVENT_CAPACITY: usize = 256;

/// What a finished upload produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSummary {
    pub upload_id: UploadId,
    /// Entity tag of the assembled object
    pub etag: ETag,
    pub size: u64,
    pub parts: u32,
    pub stats: UploadStats,
}

/// A streaming multipart upload of one source to one target.
///
/// Without a completion callback the upload waits for [`begin`](Self::begin),
/// leaving room to [`subscribe`](Self::subscribe) first. With one, it starts
/// as soon as it is built.
pub struct StreamingUpload {
    session: Mutex<Option<Session>>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<UploadEvent>,
}

impl StreamingUpload {
    pub fn builder(store: Arc<dyn RemoteStore>) -> StreamingUploadBuilder {
        StreamingUploadBuilder {
            store,
            target: None,
            object: ObjectOptions::default(),
            source: None,
            options: UploadOptions::default(),
            callback: None,
        }
    }

    /// Events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Start the upload on the current Tokio runtime.
    ///
    /// Returns `None` if it was already started.
    pub fn begin(&self) -> Option<UploadHandle> {
        let session = self.take_session()?;
        Some(UploadHandle {
            task: tokio::spawn(session.run()),
        })
    }

    fn take_session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

pub struct StreamingUploadBuilder {
    store: Arc<dyn RemoteStore>,
    target: Option<Target>,
    object: ObjectOptions,
    source: Option<ByteSource>,
    options: UploadOptions,
    callback: Option<CompletionCallback>,
}

impl StreamingUploadBuilder {
    pub fn target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Content type and metadata for the created object.
    ///
    /// Only the request that creates the upload carries them.
    pub fn object_options(mut self, object: ObjectOptions) -> Self {
        self.object = object;
        self
    }

    /// Upload the fragments of a byte stream
    pub fn stream<S>(mut self, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.source = Some(stream.boxed());
        self
    }

    /// Upload everything an async reader yields
    pub fn reader<R>(self, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        self.stream(ReaderStream::new(reader))
    }

    pub fn options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Start on build and report the outcome here
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Result<UploadSummary>) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Check the configuration; no request is made before the upload starts
    pub fn build(self) -> Result<StreamingUpload> {
        let target = self
            .target
            .ok_or_else(|| UploadError::Config("upload target is required".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| UploadError::Config("upload source is required".to_string()))?;
        self.options.validate(self.store.min_part_size())?;
        self.object
            .validate()
            .map_err(|e| UploadError::Config(format!("object options: {}", e)))?;

        let runtime = match self.callback {
            Some(_) => Some(Handle::try_current().map_err(|_| {
                UploadError::Config("starting on build requires a Tokio runtime".to_string())
            })?),
            None => None,
        };

        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = Session::new(
            self.store,
            target,
            source,
            self.options,
            state_tx,
            events.clone(),
            self.callback,
        )?
        .with_object_options(self.object);

        let upload = StreamingUpload {
            session: Mutex::new(Some(session)),
            state: state_rx,
            events,
        };

        if let Some(runtime) = runtime {
            if let Some(session) = upload.take_session() {
                runtime.spawn(session.run());
            }
        }
        Ok(upload)
    }
}

/// Resolves to the upload's terminal outcome
pub struct UploadHandle {
    task: JoinHandle<Result<UploadSummary>>,
}

impl Future for UploadHandle {
    type Output = Result<UploadSummary>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Poll::Ready(Err(_)) => Poll::Ready(Err(UploadError::Interrupted)),
        }
    }
}
