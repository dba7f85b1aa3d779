use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::file::RandomAccessFile;

/// A file on the local filesystem.
#[derive(Debug)]
pub struct FsFile {
    file: File,
}

impl FsFile {
    /// Open an existing file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Open (creating if needed) a file for reading and writing.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn from_std(file: File) -> Self {
        Self { file }
    }
}

impl RandomAccessFile for FsFile {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let mut f = &self.file;
        f.seek(SeekFrom::Start(pos))?;
        Ok(f.read(buf)?)
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> Result<usize> {
        let mut f = &self.file;
        f.seek(SeekFrom::Start(pos))?;
        f.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn discard(&self, _offset: u64, _len: u64) -> Result<()> {
        // No portable hole punching; the hint is dropped.
        Ok(())
    }

    fn allocate(&self, position: u64, len: u64) -> Result<()> {
        let end = position.saturating_add(len);
        if self.size()? < end {
            self.file.set_len(end)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
