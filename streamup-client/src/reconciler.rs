//! Waits for the store to acknowledge every part and checks its entity tags

use std::time::Duration;
use streamup_core::{CompletedPart, ListedPart, RemoteStore, Target, UploadId};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument};

use crate::part::UploadedParts;
use crate::UploadError;

pub(crate) struct Reconciler<'a> {
    store: &'a dyn RemoteStore,
    target: &'a Target,
    upload_id: &'a UploadId,
    settle_delay: Duration,
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl<'a> Reconciler<'a> {
    pub(crate) fn new(store: &'a dyn RemoteStore, target: &'a Target, upload_id: &'a UploadId) -> Self {
        Reconciler {
            store,
            target,
            upload_id,
            settle_delay: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            deadline: None,
        }
    }

    pub(crate) fn with_timing(
        mut self,
        settle_delay: Duration,
        poll_interval: Duration,
        deadline: Option<Duration>,
    ) -> Self {
        self.settle_delay = settle_delay;
        self.poll_interval = poll_interval;
        self.deadline = deadline;
        self
    }

    /// The ordered part list to commit, once the listing agrees with `uploaded`
    #[instrument(skip_all, fields(upload_id = %self.upload_id, expected = expected))]
    pub(crate) async fn reconcile(
        &self,
        uploaded: &UploadedParts,
        expected: usize,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let mut acknowledged = 0;
        let listed = match self.deadline {
            Some(deadline) => {
                let waited = timeout(deadline, self.wait_for_parts(expected, &mut acknowledged)).await;
                match waited {
                    Ok(listed) => listed?,
                    Err(_) => {
                        return Err(UploadError::AckTimeout {
                            waited: deadline,
                            acknowledged,
                            expected,
                        })
                    }
                }
            }
            None => self.wait_for_parts(expected, &mut acknowledged).await?,
        };

        verify(listed, uploaded, expected)
    }

    async fn wait_for_parts(
        &self,
        expected: usize,
        acknowledged: &mut usize,
    ) -> Result<Vec<ListedPart>, UploadError> {
        if !self.settle_delay.is_zero() {
            sleep(self.settle_delay).await;
        }

        loop {
            let listed = self.store.list_parts(self.target, self.upload_id).await?;
            *acknowledged = listed.len();

            if listed.len() == expected {
                return Ok(listed);
            }
            if listed.len() > expected {
                return Err(UploadError::Protocol(format!(
                    "store lists {} parts but only {} were uploaded",
                    listed.len(),
                    expected
                )));
            }

            debug!(acknowledged = listed.len(), expected, "Store has not listed every part yet");
            sleep(self.poll_interval).await;
        }
    }
}

/// Check the listing covers parts `1..=expected` exactly, with the recorded tags.
///
/// Returns the record in ascending order, ready to commit.
fn verify(
    mut listed: Vec<ListedPart>,
    uploaded: &UploadedParts,
    expected: usize,
) -> Result<Vec<CompletedPart>, UploadError> {
    if uploaded.len() != expected || listed.len() != expected {
        return Err(UploadError::Protocol(format!(
            "{} part(s) cut, {} recorded, {} listed",
            expected,
            uploaded.len(),
            listed.len()
        )));
    }
    listed.sort_by_key(|p| p.part_number);

    for (index, part) in listed.into_iter().enumerate() {
        let part_number = index as u32 + 1;
        if part.part_number != part_number {
            return Err(UploadError::Protocol(format!(
                "store listed part {} where part {} belongs",
                part.part_number, part_number
            )));
        }
        if part.etag.is_empty() {
            return Err(UploadError::Protocol(format!(
                "store listed part {} without an entity tag",
                part.part_number
            )));
        }
        match uploaded.get(part_number) {
            Some(local) if *local == part.etag => {}
            local => {
                return Err(UploadError::Consistency {
                    part_number,
                    local: local.map(|e| e.to_string()).unwrap_or_else(|| "nothing".to_string()),
                    remote: part.etag,
                })
            }
        }
    }
    Ok(uploaded.completed_parts())
}
