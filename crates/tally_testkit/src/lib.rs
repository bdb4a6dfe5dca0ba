//! # Tally Testkit
//!
//! Test utilities for the Tally ledger.
//!
//! This crate provides:
//! - Ledger fixtures (in-memory and file-backed) and action builders
//! - Snapshots of materialized state for convergence checks
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use tally_core::Origin;
//! use tally_testkit::prelude::*;
//!
//! let ledger = TestLedger::memory();
//! ledger
//!     .process_actions(&[account("savings", 100.0, 0)], Origin::Local)
//!     .unwrap();
//! assert_eq!(ledger.account_balance("savings").unwrap(), Some(100.0));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
