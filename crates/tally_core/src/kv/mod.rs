//! Table store backing the ledger and the log mirror.
//!
//! - [`record`]: on-disk framing of one committed write set
//! - [`KvStore`]: in-memory tables rebuilt from, and made durable by, those records

pub mod record;
mod store;

pub use store::{KvStore, Txn};
