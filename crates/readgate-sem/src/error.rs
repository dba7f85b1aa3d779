use thiserror::Error;

/// Result type local to readgate-sem.
pub type Result<T> = std::result::Result<T, Error>;

/// Ways an admission can fail. None of them damage the semaphore; the caller
/// may retry later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The wait queue was already full when the request arrived. Nothing was
    /// debited.
    #[error("{name}: reader concurrency queue overload")]
    Overload { name: String },

    /// The request sat in the wait queue past its deadline. Nothing was debited.
    #[error("{name}: timed out waiting for reader admission")]
    TimedOut { name: String },

    /// The semaphore was broken or dropped while the request was queued.
    #[error("{name}: reader concurrency semaphore was shut down")]
    Shutdown { name: String },
}

impl Error {
    pub fn is_overload(&self) -> bool {
        matches!(self, Error::Overload { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Error::TimedOut { .. })
    }
}
