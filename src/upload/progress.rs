//! Upload progress tracking

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Caller hook receiving `(bytes_transferred, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Cumulative byte counter shared by all chunk tasks of one upload
pub struct ProgressTracker {
    transferred: AtomicU64,
    total: Option<u64>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(total: Option<u64>, callback: Option<ProgressCallback>) -> Self {
        Self {
            transferred: AtomicU64::new(0),
            total,
            callback,
        }
    }

    /// Bytes reported so far
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Record `n` more bytes and notify the callback.
    ///
    /// Returns the new cumulative total. A panicking callback is logged and
    /// otherwise ignored.
    pub fn add(&self, n: u64) -> u64 {
        let current = self.transferred.fetch_add(n, Ordering::AcqRel) + n;

        if let Some(callback) = &self.callback {
            let notified = catch_unwind(AssertUnwindSafe(|| callback(current, self.total)));
            if notified.is_err() {
                tracing::warn!(
                    transferred = current,
                    total = ?self.total,
                    "Progress callback panicked"
                );
            }
        }

        current
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("transferred", &self.transferred())
            .field("total", &self.total)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}
