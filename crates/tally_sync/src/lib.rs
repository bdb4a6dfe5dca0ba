//! # Tally Sync
//!
//! Reconciles a local [`tally_core::LedgerStore`] with the shared log every
//! device appends to.
//!
//! This crate provides:
//! - [`RemoteLog`]: the shared, 1-indexed, append-only log of actions, with
//!   in-memory and JSON-lines file providers
//! - [`LogMirror`]: a local prefix copy of the remote log with a
//!   compare-and-append primitive
//! - [`SyncEngine`]: pull, push, conflict retry and rebuild
//!
//! ## Architecture
//!
//! A sync run is **pull-then-push**:
//! 1. Pull every unseen remote row into the ledger (as remote actions) and
//!    the mirror
//! 2. Push the ledger's local queue page by page to the remote, then record
//!    each page in the mirror with a compare-and-append
//! 3. A failed compare-and-append means another device appended first: pull
//!    again and continue. If that keeps failing, rebuild a fresh ledger from
//!    the remote log plus the still-queued local actions
//!
//! ## Key Invariants
//!
//! - The mirror is always a prefix of the remote log
//! - Pull fully drains the remote before any push
//! - At most one sync runs per engine at a time
//! - Replaying an action twice is a no-op, so delivery is at-least-once

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod mirror;
mod remote;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{LedgerFactory, SyncEngine, SyncOutcome, SyncReport, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use mirror::{LogMirror, MirrorTail};
pub use remote::{FileRemoteLog, MemoryRemoteLog, RemoteLog};
