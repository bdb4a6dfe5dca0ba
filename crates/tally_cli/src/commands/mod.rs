//! CLI command implementations.

pub mod ledger;
pub mod report;
pub mod sync;
pub mod workspace;

use clap::ValueEnum;
use std::path::PathBuf;
use tally_core::{Action, ActionOutcome, CoreError, Origin, Rejection};
use tally_storage::StorageError;
use tally_sync::SyncError;
use thiserror::Error;

pub use workspace::Workspace;

/// Result type for commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors a command can end with.
#[derive(Error, Debug)]
pub enum CliError {
    /// A sync run failed.
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),

    /// The ledger failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A ledger file could not be opened.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The ledger refused the action.
    #[error("action rejected: {0}")]
    Rejected(#[from] Rejection),

    /// A record named on the command line does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record.
        kind: &'static str,
        /// Id given.
        id: String,
    },

    /// Another process holds the data directory.
    #[error("data directory {} is in use by another process", .0.display())]
    Locked(PathBuf),

    /// Bad arguments or data directory contents.
    #[error("{0}")]
    Usage(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Output encoding failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Whether the message already says what failed.
    pub fn is_sync(&self) -> bool {
        matches!(self, CliError::Sync(_))
    }
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Tab-separated lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Applies one action as a local mutation.
pub(crate) fn apply(workspace: &Workspace, action: Action) -> CliResult<()> {
    let action_type = action.action_type();
    let report = workspace
        .ledger()
        .process_actions(std::slice::from_ref(&action), Origin::Local)?;

    match report.outcomes.into_iter().next() {
        Some(ActionOutcome::Rejected(rejection)) => Err(rejection.into()),
        _ => {
            tracing::debug!(action = %action_type, "applied");
            Ok(())
        }
    }
}
