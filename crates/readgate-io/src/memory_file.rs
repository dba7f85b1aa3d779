//! In-memory file for testing.
//!
//! Backed by a shared `Vec<u8>`; clones see the same contents.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::file::RandomAccessFile;

#[derive(Debug, Clone, Default)]
pub struct MemoryFile {
    data: Rc<RefCell<Vec<u8>>>,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the contents (used by tests).
    pub fn with_contents(bytes: Vec<u8>) -> Self {
        Self {
            data: Rc::new(RefCell::new(bytes)),
        }
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.borrow().is_empty()
    }
}

impl RandomAccessFile for MemoryFile {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.borrow();
        let Ok(start) = usize::try_from(pos) else {
            return Ok(0);
        };
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> Result<usize> {
        let mut data = self.data.borrow_mut();
        let out_of_range = || Error::OutOfRange {
            op: "write",
            offset: pos,
            len: buf.len() as u64,
            size: data.len() as u64,
        };
        let start = usize::try_from(pos).map_err(|_| out_of_range())?;
        let end = start.checked_add(buf.len()).ok_or_else(out_of_range)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.borrow().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let mut data = self.data.borrow_mut();
        let len = usize::try_from(len).map_err(|_| Error::OutOfRange {
            op: "truncate",
            offset: 0,
            len,
            size: data.len() as u64,
        })?;
        data.resize(len, 0);
        Ok(())
    }

    fn discard(&self, offset: u64, len: u64) -> Result<()> {
        let mut data = self.data.borrow_mut();
        let size = data.len() as u64;
        let start = offset.min(size) as usize;
        let end = offset.saturating_add(len).min(size) as usize;
        data[start..end].fill(0);
        Ok(())
    }

    fn allocate(&self, position: u64, len: u64) -> Result<()> {
        let end = position.saturating_add(len);
        if self.size()? < end {
            self.truncate(end)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stop_at_end_of_file() {
        let f = MemoryFile::with_contents(b"abcdef".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(f.read_at(4, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(f.read_at(10, &mut buf).unwrap(), 0);
        assert_eq!(f.read_bulk(1, 3).unwrap(), b"bcd");
    }

    #[test]
    fn writes_extend_and_discard_zeroes() {
        let f = MemoryFile::new();
        assert!(f.is_empty());
        f.write_at(2, b"xy").unwrap();
        assert_eq!(f.read_bulk(0, 10).unwrap(), vec![0, 0, b'x', b'y']);
        f.discard(3, 100).unwrap();
        assert_eq!(f.read_bulk(0, 10).unwrap(), vec![0, 0, b'x', 0]);
        f.allocate(0, 8).unwrap();
        assert_eq!(f.len(), 8);
    }

    #[test]
    fn write_past_address_space_is_out_of_range() {
        let f = MemoryFile::new();
        let err = f.write_at(u64::MAX, b"abc").unwrap_err();
        assert!(matches!(err, Error::OutOfRange { op: "write", .. }));
        assert!(f.is_empty());
    }
}
