//! High-water mark of memory consumed from a semaphore's ledger.

use std::cell::Cell;

#[derive(Debug, Default)]
pub struct PeakTracker {
    peak_bytes: Cell<i64>,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self {
            peak_bytes: Cell::new(0),
        }
    }

    /// Record a new "consumed bytes" value; updates peak if higher.
    pub fn record_used(&self, used_bytes: i64) {
        if used_bytes > self.peak_bytes.get() {
            self.peak_bytes.set(used_bytes);
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(used_bytes, peak = self.peak_bytes.get(), "ledger memory in use");
    }

    pub fn peak(&self) -> i64 {
        self.peak_bytes.get()
    }
}
