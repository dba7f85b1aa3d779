use thiserror::Error;

/// Result type local to readgate-io.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("admission failed: {0}")]
    Admission(#[from] readgate_sem::Error),

    #[error("{op} out of range: offset {offset}, len {len}, file size {size}")]
    OutOfRange {
        op: &'static str,
        offset: u64,
        len: u64,
        size: u64,
    },
}
