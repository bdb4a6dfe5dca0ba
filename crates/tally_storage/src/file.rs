//! Commit logs kept in a single file.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A commit log stored in one file.
///
/// The cached length is the authority for offsets; it starts at the file
/// length on open and only moves through `append` and `truncate`.
///
/// ```no_run
/// use tally_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new(".tally/mirror.log")).unwrap();
/// log.append(b"commit").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    /// Opens the log at `path`, creating an empty one if it is missing.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        tracing::trace!(path = %path.display(), len, "opened log file");

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len,
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let in_range = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.len);
        if !in_range {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }

        let mut buf = vec![0u8; len];
        if len > 0 {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.len;
        if !data.is_empty() {
            // Opened in append mode, so the write lands at the end.
            self.file.get_mut().write_all(data)?;
            self.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.get_mut().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.get_mut().sync_data()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.len)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len > self.len {
            return Err(StorageError::TruncatePastEnd {
                requested: len,
                size: self.len,
            });
        }

        let file = self.file.get_mut();
        file.set_len(len)?;
        file.sync_all()?;
        tracing::debug!(
            path = %self.path.display(),
            from = self.len,
            to = len,
            "truncated log file"
        );
        self.len = len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn offsets_follow_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        let mut log = FileBackend::open(&path).unwrap();
        assert!(log.is_empty().unwrap());
        assert_eq!(log.append(b"acct").unwrap(), 0);
        assert_eq!(log.append(b"xfer").unwrap(), 4);
        assert_eq!(log.read_at(4, 4).unwrap(), b"xfer");
        assert_eq!(log.path(), path);
    }

    #[test]
    fn reopen_replays_everything() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        {
            let mut log = FileBackend::open(&path).unwrap();
            log.append(b"one;").unwrap();
            log.append(b"two;").unwrap();
            log.sync().unwrap();
        }

        let log = FileBackend::open(&path).unwrap();
        assert_eq!(log.len().unwrap(), 8);
        assert_eq!(log.read_all().unwrap(), b"one;two;");
    }

    #[test]
    fn reads_stop_at_end() {
        let dir = tempdir().unwrap();
        let mut log = FileBackend::open(&dir.path().join("x.log")).unwrap();
        log.append(b"abc").unwrap();

        assert!(log.read_at(3, 0).unwrap().is_empty());
        assert!(matches!(
            log.read_at(2, 2),
            Err(StorageError::ReadPastEnd { offset: 2, len: 2, size: 3 })
        ));
        assert!(log.read_at(u64::MAX, 1).is_err());
    }

    #[test]
    fn torn_tail_is_cut_and_log_continues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.log");
        let mut log = FileBackend::open(&path).unwrap();
        log.append(b"good").unwrap();
        log.append(b"-torn").unwrap();

        log.truncate(4).unwrap();
        assert_eq!(log.append(b"!").unwrap(), 4);
        assert_eq!(std::fs::read(&path).unwrap(), b"good!");
        assert!(log.truncate(50).is_err());
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("ledger.log");
        let log = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(log.len().unwrap(), 0);
        assert!(path.exists());
    }
}
