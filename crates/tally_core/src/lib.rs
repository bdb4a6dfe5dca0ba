//! # Tally Core
//!
//! The local half of the Tally ledger.
//!
//! This crate provides:
//! - [`Action`]: the versioned, immutable fact behind every ledger mutation
//! - Entities ([`Account`], [`Transfer`], [`Category`], [`InitialSavings`])
//! - [`KvStore`]: a durable, transactional table store over a commit log
//! - [`LedgerStore`]: applies ordered actions to materialized state and keeps
//!   the queue of local actions not yet published to the shared log
//!
//! ## Key Invariants
//!
//! - Monotonic apply: an update or delete lands only if its `modifiedAt` is
//!   strictly newer than the stored one
//! - Create-once: a second create for an existing id is a no-op
//! - Every `process_actions` batch commits atomically or not at all
//! - Entities are never physically deleted, only flagged `deleted`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod config;
mod entity;
mod error;
pub mod kv;
mod ledger;
mod types;
pub mod validate;

pub use action::{Action, ActionType, Command, DecodeError, ACTION_VERSION};
pub use config::StoreConfig;
pub use entity::{
    Account, Category, CategoryKind, Deletion, InitialSavings, Record, Transfer, TransferKind,
};
pub use error::{CoreError, CoreResult, EntityConflict, Rejection, ValidationError};
pub use kv::{KvStore, Txn};
pub use ledger::{
    ActionOutcome, CategoryTotal, DateRange, LedgerStore, Origin, ProcessReport, TransferFilter,
};
pub use types::{position_key, round_money, EntityKind, Timestamp};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
