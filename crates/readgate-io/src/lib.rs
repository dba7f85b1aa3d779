#![forbid(unsafe_code)]
//! readgate-io: file adapters for the read path.
//!
//! - `file`: the [`RandomAccessFile`] trait the read path does I/O through.
//! - `fs`: local filesystem implementation.
//! - `memory_file`: in-memory implementation for tests and simulations.
//! - `tracking`: [`TrackingFile`], which charges every bulk-read buffer to a
//!   reader permit for as long as the buffer lives.

pub mod error;
pub mod file;
pub mod fs;
pub mod memory_file;
pub mod tracking;

pub use error::{Error, Result};
pub use file::RandomAccessFile;
pub use fs::FsFile;
pub use memory_file::MemoryFile;
pub use tracking::{make_tracked_file, TrackedBuffer, TrackingFile};
