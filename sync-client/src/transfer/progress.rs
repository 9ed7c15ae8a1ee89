//! Byte-level progress tracking for sync runs.

use std::time::{Duration, Instant};

/// Progress information for a sync pass.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub bytes_per_second: u64,
    pub eta_seconds: u64,
    pub percent_complete: f64,
    pub files_total: usize,
}

impl TransferProgress {
    pub fn new(total_bytes: u64, files_total: usize) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
            percent_complete: 0.0,
            files_total,
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        } else {
            100.0
        };
    }
}

/// Progress tracker with time-based speed calculation, logged at the end of
/// a sync pass (spec §4.9 design notes on observability).
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, files_total: usize) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes, files_total),
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = transferred_bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }
        if self.progress.bytes_per_second > 0 {
            let remaining = self.progress.total_bytes.saturating_sub(transferred_bytes);
            self.progress.eta_seconds = remaining / self.progress.bytes_per_second;
        }

        self.progress.update(transferred_bytes);
        self.last_update_time = now;
        self.last_bytes = transferred_bytes;
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}
