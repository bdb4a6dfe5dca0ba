//! Error types for syncing.

use tally_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote log provider failed (network, auth, I/O).
    #[error("remote log error: {message}")]
    Provider {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The local ledger or mirror failed, or an action is structurally bad.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The mirror's tail is not what the caller expected. Recoverable: pull
    /// and try again.
    #[error("mirror conflict: append at position {from}, mirror holds {count}")]
    MirrorConflict {
        /// Position the caller wanted to append at.
        from: u64,
        /// Number of rows the mirror holds.
        count: u64,
    },

    /// A 1-based inclusive range was empty or started at zero.
    #[error("invalid range [{from}, {to}]")]
    InvalidRange {
        /// First position requested.
        from: u64,
        /// Last position requested.
        to: u64,
    },

    /// Another sync run holds the engine.
    #[error("a sync is already in progress")]
    SyncInProgress,

    /// A remote call did not finish in time.
    #[error("remote log call timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable provider error.
    pub fn provider_retryable(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable provider error.
    pub fn provider_fatal(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Provider { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true for a mirror compare-and-append failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::MirrorConflict { .. })
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let retryable = matches!(
            err.kind(),
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
        );
        Self::Provider {
            message: err.to_string(),
            retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::provider_retryable("connection reset").is_retryable());
        assert!(!SyncError::provider_fatal("permission denied").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::SyncInProgress.is_retryable());
        assert!(!SyncError::MirrorConflict { from: 3, count: 4 }.is_retryable());
        assert!(!SyncError::Core(CoreError::MalformedAction("x".into())).is_retryable());
    }

    #[test]
    fn io_errors_become_provider_errors() {
        let err: SyncError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(err.is_retryable());

        let err: SyncError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, SyncError::Provider { retryable: false, .. }));
    }

    #[test]
    fn error_display() {
        let err = SyncError::MirrorConflict { from: 3, count: 4 };
        assert_eq!(
            err.to_string(),
            "mirror conflict: append at position 3, mirror holds 4"
        );
        assert_eq!(
            SyncError::Core(CoreError::InvalidRange { from: 0, to: 1 }).to_string(),
            "invalid range [0, 1]"
        );
    }
}
