#![forbid(unsafe_code)]
//! readgate: admission control and resource accounting for a storage engine's
//! read path.
//!
//! This facade re-exports the workspace crates:
//! - [`readgate_core`]: resources, ids, configuration, the evictable-read capability.
//! - [`readgate_sem`]: the reader concurrency semaphore, permits and memory units.
//! - [`readgate_io`]: file adapters that charge read buffers to permits.

pub use readgate_core;
pub use readgate_io;
pub use readgate_sem;

pub use readgate_core::{EvictableRead, Resources, SemaphoreConfig};
pub use readgate_sem::{
    Admission, Error, InactiveReadHandle, InactiveReadStats, MemoryUnits,
    ReaderConcurrencySemaphore, ReaderPermit,
};
