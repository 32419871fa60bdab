//! Upload options

use serde::Deserialize;
use std::time::Duration;

use crate::UploadError;

/// Tuning for one streaming upload.
///
/// Deserializes with per-field defaults; durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Part uploads allowed in flight at once
    pub concurrent_parts: usize,
    /// Size of every part but the last; also the buffering cost per queued part
    pub max_part_size: usize,
    /// Retries per part for request timeouts
    pub retries: u32,
    /// How long to wait for the store to acknowledge every part; zero waits forever
    #[serde(with = "millis")]
    pub wait_time: Duration,
    /// Pause between part listings while waiting for acknowledgement
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Pause before the first listing
    #[serde(with = "millis")]
    pub settle_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            concurrent_parts: 5,
            max_part_size: 5 * 1024 * 1024,
            retries: 5,
            wait_time: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl UploadOptions {
    pub fn with_concurrent_parts(mut self, concurrent_parts: usize) -> Self {
        self.concurrent_parts = concurrent_parts;
        self
    }

    pub fn with_max_part_size(mut self, max_part_size: usize) -> Self {
        self.max_part_size = max_part_size;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Acknowledgement deadline, if bounded
    pub fn ack_deadline(&self) -> Option<Duration> {
        (!self.wait_time.is_zero()).then_some(self.wait_time)
    }

    /// Listing interval, kept shorter than a bounded deadline
    pub fn effective_poll_interval(&self) -> Duration {
        match self.ack_deadline() {
            Some(deadline) if self.poll_interval >= deadline => deadline / 4,
            _ => self.poll_interval,
        }
    }

    /// Reject options no upload could run with
    pub fn validate(&self, min_part_size: usize) -> Result<(), UploadError> {
        if self.concurrent_parts == 0 {
            return Err(UploadError::Config("concurrent_parts must be at least 1".to_string()));
        }
        if self.max_part_size == 0 {
            return Err(UploadError::Config("max_part_size must be at least 1 byte".to_string()));
        }
        if self.max_part_size < min_part_size {
            return Err(UploadError::Config(format!(
                "max_part_size {} is below the store minimum of {} bytes",
                self.max_part_size, min_part_size
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(UploadError::Config("poll_interval must be positive".to_string()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
