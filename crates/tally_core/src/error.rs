//! Error types for the ledger core.
//!
//! Two families live here. [`CoreError`] is hard: it aborts the current batch
//! and reaches the caller. [`Rejection`] is soft: it describes why a single
//! action was skipped and never escapes `process_actions` as an error.

use crate::types::{EntityKind, Timestamp};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Hard errors from the ledger core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tally_storage::StorageError),

    /// Encoding or decoding of a stored value failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The commit log holds a record that cannot be trusted.
    #[error("commit log corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// An action envelope could not be decoded (bad JSON or unknown `type`).
    #[error("malformed action: {0}")]
    MalformedAction(String),

    /// An action carries a schema version this build does not understand.
    #[error("unsupported version {version} for action type {action_type}")]
    UnsupportedVersion {
        /// The action's `type` string.
        action_type: String,
        /// The offending version.
        version: u32,
    },

    /// A 1-based inclusive range was empty or started at zero.
    #[error("invalid range [{from}, {to}]")]
    InvalidRange {
        /// First position requested.
        from: u64,
        /// Last position requested.
        to: u64,
    },
}

impl CoreError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }

    /// Returns true for errors caused by the shape of the data itself rather
    /// than by I/O.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MalformedAction(_) | Self::UnsupportedVersion { .. } | Self::InvalidRange { .. }
        )
    }
}

/// An action payload is malformed or breaks a business rule.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The payload does not have the shape its action type requires.
    #[error("invalid payload: {0}")]
    Payload(String),

    /// A field is present but its value is not allowed.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire.
        field: &'static str,
        /// Why the value was refused.
        reason: String,
    },

    /// The action refers to an entity that does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Id of the missing entity.
        id: String,
    },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidField`].
    pub fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// An action lost against the stored state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntityConflict {
    /// A create for an id that already exists; the existing record wins.
    #[error("{kind} {id} already exists")]
    AlreadyExists {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        id: String,
    },

    /// An update or delete that is not strictly newer than the stored record.
    #[error("stale {kind} {id}: stored {stored}, incoming {incoming}")]
    Stale {
        /// Entity kind.
        kind: EntityKind,
        /// Entity id.
        id: String,
        /// `modifiedAt` of the stored record.
        stored: Timestamp,
        /// `modifiedAt` carried by the action.
        incoming: Timestamp,
    },
}

/// Why a single action was skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// Payload or business-rule failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Lost against stored state.
    #[error(transparent)]
    Conflict(#[from] EntityConflict),
}
