//! # Tally Storage
//!
//! Append-only byte stores underneath the ledger's commit logs.
//!
//! A backend knows offsets and lengths, nothing else. Record framing,
//! checksums and torn-tail detection belong to `tally_core`, which only
//! ever asks a backend to append, replay, flush, sync or cut a torn tail.
//!
//! - [`InMemoryBackend`] backs tests and throwaway ledgers
//! - [`FileBackend`] backs a ledger or mirror inside a data directory
//!
//! ```rust
//! use tally_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut log = InMemoryBackend::new();
//! log.append(b"first").unwrap();
//! log.append(b"second").unwrap();
//! assert_eq!(log.read_all().unwrap(), b"firstsecond");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
