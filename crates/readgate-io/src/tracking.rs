//! A file wrapper that charges read buffers to a reader permit.
//!
//! Bulk reads take memory units for the requested range before issuing the
//! read, shrink them to what was actually read, and hand both back together as
//! a [`TrackedBuffer`]. The memory stays charged to the permit's semaphore until
//! the buffer is dropped. Every other operation passes through untouched.

use std::ops::{Deref, DerefMut};

use readgate_sem::{MemoryUnits, ReaderPermit};

use crate::error::Result;
use crate::file::RandomAccessFile;

/// Byte buffer that returns its accounted memory on drop via its units.
pub struct TrackedBuffer {
    units: MemoryUnits,
    buf: Vec<u8>,
}

impl TrackedBuffer {
    /// Current accounted size (bytes).
    pub fn accounted_bytes(&self) -> i64 {
        self.units.memory()
    }

    /// Split into the raw bytes and the units still charging for them.
    pub fn into_inner(self) -> (Vec<u8>, MemoryUnits) {
        (self.buf, self.units)
    }
}

impl Deref for TrackedBuffer {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for TrackedBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl std::fmt::Debug for TrackedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedBuffer")
            .field("len", &self.buf.len())
            .field("accounted", &self.units.memory())
            .finish()
    }
}

pub struct TrackingFile<F> {
    tracked_file: F,
    permit: ReaderPermit,
}

impl<F: RandomAccessFile> TrackingFile<F> {
    pub fn new(file: F, permit: ReaderPermit) -> Self {
        Self {
            tracked_file: file,
            permit,
        }
    }

    pub fn permit(&self) -> &ReaderPermit {
        &self.permit
    }

    pub fn inner(&self) -> &F {
        &self.tracked_file
    }

    pub fn into_inner(self) -> (F, ReaderPermit) {
        (self.tracked_file, self.permit)
    }

    /// Read up to `range_size` bytes at `offset`, charging the buffer to the
    /// permit.
    pub fn read_bulk(&self, offset: u64, range_size: usize) -> Result<TrackedBuffer> {
        let mut units = self.permit.get_memory_units(range_size);
        let buf = self.tracked_file.read_bulk(offset, range_size)?;
        if buf.len() != range_size {
            units.reset(buf.len());
        }
        Ok(TrackedBuffer { units, buf })
    }

    pub fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        self.tracked_file.read_at(pos, buf)
    }

    pub fn write_at(&self, pos: u64, buf: &[u8]) -> Result<usize> {
        self.tracked_file.write_at(pos, buf)
    }

    pub fn flush(&self) -> Result<()> {
        self.tracked_file.flush()
    }

    pub fn size(&self) -> Result<u64> {
        self.tracked_file.size()
    }

    pub fn truncate(&self, len: u64) -> Result<()> {
        self.tracked_file.truncate(len)
    }

    pub fn discard(&self, offset: u64, len: u64) -> Result<()> {
        self.tracked_file.discard(offset, len)
    }

    pub fn allocate(&self, position: u64, len: u64) -> Result<()> {
        self.tracked_file.allocate(position, len)
    }

    pub fn close(&self) -> Result<()> {
        self.tracked_file.close()
    }
}

/// Wrap `file` so that its bulk reads are charged to `permit`.
pub fn make_tracked_file<F: RandomAccessFile>(file: F, permit: ReaderPermit) -> TrackingFile<F> {
    TrackingFile::new(file, permit)
}
