//! The byte-store seam between commit logs and the medium holding them.

use crate::error::{StorageError, StorageResult};

/// An append-only byte store holding one commit log.
///
/// The ledger and the log mirror each own one backend. A backend never
/// interprets the bytes; framing and checksums live in `tally_core`.
///
/// Offsets are byte positions from the start of the log. `len()` is the
/// offset the next `append` writes at.
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`StorageError::ReadPastEnd`] when the range is not fully written.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at the end of the log and returns where it starts.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Hands buffered bytes to the operating system.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces written bytes onto the medium.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current length of the log in bytes.
    fn len(&self) -> StorageResult<u64>;

    /// Returns true if nothing has been written.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Cuts the log back to `len` bytes. Only recovery drops bytes.
    ///
    /// # Errors
    ///
    /// [`StorageError::TruncatePastEnd`] when `len` exceeds the current length.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Reads the whole log, as replay on open does.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let len = self.len()?;
        let len = usize::try_from(len).map_err(|_| StorageError::TooLarge(len))?;
        self.read_at(0, len)
    }
}
