//! Progress reporting hooks for batch runs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives progress callbacks from the batch loop. Implementations must
/// tolerate `finish` before `total` items were reported (interrupted runs).
pub trait ProgressReporter: Send + Sync {
    fn start(&self, total: u64, label: &str);
    fn advance(&self, n: u64);
    fn finish(&self);
}

/// Discards all progress. The default when callers do not care.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn start(&self, _total: u64, _label: &str) {}
    fn advance(&self, _n: u64) {}
    fn finish(&self) {}
}

/// Emits progress as tracing events. Useful for headless runs where a
/// terminal progress bar makes no sense.
#[derive(Default)]
pub struct LogProgress {
    done: AtomicU64,
    total: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for LogProgress {
    fn start(&self, total: u64, label: &str) {
        self.done.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        tracing::info!(total, "{}", label);
    }

    fn advance(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        let total = self.total.load(Ordering::Relaxed);
        tracing::debug!(done, total, "progress");
    }

    fn finish(&self) {
        let done = self.done.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        tracing::info!(done, total, "batch finished");
    }
}
