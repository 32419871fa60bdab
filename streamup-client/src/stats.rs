//! Running upload statistics

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Counters for one upload
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadStats {
    /// Bytes pulled from the source
    pub bytes_read: u64,
    /// Bytes the store accepted as parts
    pub bytes_uploaded: u64,
    /// Parts the store accepted
    pub parts: u32,
    /// Part attempts repeated after a timeout
    pub retries: u32,
    pub elapsed: Duration,
}

impl UploadStats {
    /// Accepted bytes per second over the elapsed time
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_uploaded as f64 / secs
    }
}

#[derive(Debug)]
pub(crate) struct StatsCollector {
    started: Instant,
    stats: UploadStats,
}

impl StatsCollector {
    pub(crate) fn start() -> Self {
        StatsCollector {
            started: Instant::now(),
            stats: UploadStats::default(),
        }
    }

    pub(crate) fn read(&mut self, bytes: usize) {
        self.stats.bytes_read += bytes as u64;
    }

    pub(crate) fn uploaded(&mut self, bytes: usize) {
        self.stats.bytes_uploaded += bytes as u64;
        self.stats.parts += 1;
    }

    pub(crate) fn retried(&mut self) {
        self.stats.retries += 1;
    }

    pub(crate) fn snapshot(&self) -> UploadStats {
        UploadStats {
            elapsed: self.started.elapsed(),
            ..self.stats.clone()
        }
    }
}
