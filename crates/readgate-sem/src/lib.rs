#![forbid(unsafe_code)]
//! readgate-sem: the reader concurrency semaphore.
//!
//! Bounds how many reads run at once and how much buffer memory they hold,
//! queues the excess in FIFO order with per-request deadlines, and reclaims
//! resources from idle ("inactive") reads before making anyone wait.
//!
//! All accounting flows through RAII types: a [`ReaderPermit`] returns its
//! base cost when the last clone drops, and [`MemoryUnits`] return their bytes
//! when dropped. A semaphore belongs to a single thread (one shard); nothing in
//! here is `Send`.

pub mod error;
pub mod inactive;
pub mod permit;
pub mod semaphore;
pub mod tracking;
mod wait_queue;

pub use error::{Error, Result};
pub use inactive::{InactiveReadHandle, InactiveReadStats};
pub use permit::{MemoryUnits, ReaderPermit};
pub use semaphore::{Admission, ReaderConcurrencySemaphore};
pub use tracking::PeakTracker;

pub use readgate_core::{EvictableRead, Resources};
