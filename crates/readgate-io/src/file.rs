//! Abstract positioned-I/O interface used by the read path.
//!
//! Implemented by [`FsFile`](crate::FsFile) for the local filesystem and by
//! [`MemoryFile`](crate::MemoryFile) for tests. [`TrackingFile`](crate::TrackingFile)
//! wraps any implementation.

use crate::error::Result;

pub trait RandomAccessFile {
    /// Read into `buf` starting at `pos`. Returns the number of bytes read,
    /// which is short only at end of file.
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at `pos`, extending the file if needed.
    fn write_at(&self, pos: u64, buf: &[u8]) -> Result<usize>;

    /// Read up to `len` bytes at `offset` into a fresh buffer.
    fn read_bulk(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            // Nothing can be read beyond the end of the address space.
            let Some(pos) = offset.checked_add(filled as u64) else {
                break;
            };
            let n = self.read_at(pos, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn flush(&self) -> Result<()>;

    fn size(&self) -> Result<u64>;

    fn truncate(&self, len: u64) -> Result<()>;

    /// Hint that `[offset, offset + len)` is no longer needed.
    fn discard(&self, offset: u64, len: u64) -> Result<()>;

    /// Make sure `[position, position + len)` is backed by storage.
    fn allocate(&self, position: u64, len: u64) -> Result<()>;

    fn close(&self) -> Result<()>;
}
