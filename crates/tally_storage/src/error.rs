//! Storage errors.

use thiserror::Error;

/// Result alias for backend calls.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failures raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read asked for bytes that were never written.
    #[error("read of {len} bytes at offset {offset} passes end of log ({size} bytes)")]
    ReadPastEnd {
        /// Start of the read.
        offset: u64,
        /// Bytes requested.
        len: usize,
        /// Log length at the time of the read.
        size: u64,
    },

    /// Truncation can only shorten the log.
    #[error("cannot truncate log to {requested} bytes, it holds {size}")]
    TruncatePastEnd {
        /// Length asked for.
        requested: u64,
        /// Current length.
        size: u64,
    },

    /// The log does not fit in memory on this platform.
    #[error("log of {0} bytes is too large to load")]
    TooLarge(u64),
}
