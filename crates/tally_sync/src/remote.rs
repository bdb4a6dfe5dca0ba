//! The shared append-only log.
//!
//! Rows are serialized actions (JSON), 1-indexed, never rewritten. Providers
//! have no conflict detection of their own; the [`crate::LogMirror`] does that.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tally_core::Action;

/// A durable, shared, append-only, 1-indexed log of actions.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    /// Returns rows `[from, to]` (1-based, inclusive).
    ///
    /// Returns fewer rows than requested, possibly none, when the range runs
    /// past the head. That is the only end-of-log signal.
    async fn get_actions(&self, from: u64, to: u64) -> SyncResult<Vec<Action>>;

    /// Appends `actions` at the tail in order and returns the position the
    /// first one landed at.
    async fn append_actions(&self, actions: &[Action]) -> SyncResult<u64>;
}

pub(crate) fn check_range(from: u64, to: u64) -> SyncResult<()> {
    if from == 0 || to < from {
        return Err(SyncError::InvalidRange { from, to });
    }
    Ok(())
}

fn serialize(actions: &[Action]) -> SyncResult<Vec<String>> {
    Ok(actions
        .iter()
        .map(Action::to_json)
        .collect::<Result<_, _>>()?)
}

fn page_bounds(from: u64, to: u64) -> (usize, usize) {
    let skip = usize::try_from(from - 1).unwrap_or(usize::MAX);
    let take = usize::try_from(to - from + 1).unwrap_or(usize::MAX);
    (skip, take)
}

/// A remote log held in memory.
///
/// Shared by handing the same `Arc` to several engines. Can be switched
/// offline to simulate provider failures.
#[derive(Debug, Default)]
pub struct MemoryRemoteLog {
    rows: RwLock<Vec<String>>,
    offline: AtomicBool,
}

impl MemoryRemoteLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> u64 {
        self.rows.read().len() as u64
    }

    /// Returns true if no row has been appended.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Raw rows, in order.
    pub fn rows(&self) -> Vec<String> {
        self.rows.read().clone()
    }

    /// Appends a raw row without decoding it.
    pub fn push_raw(&self, row: impl Into<String>) -> u64 {
        let mut rows = self.rows.write();
        rows.push(row.into());
        rows.len() as u64
    }

    /// Makes every call fail with a retryable provider error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::provider_retryable("remote log unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteLog for MemoryRemoteLog {
    async fn get_actions(&self, from: u64, to: u64) -> SyncResult<Vec<Action>> {
        check_range(from, to)?;
        self.check_online()?;

        let (skip, take) = page_bounds(from, to);
        let rows = self.rows.read();
        let actions = rows
            .iter()
            .skip(skip)
            .take(take)
            .map(|row| Action::from_json(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(actions)
    }

    async fn append_actions(&self, actions: &[Action]) -> SyncResult<u64> {
        self.check_online()?;
        let encoded = serialize(actions)?;

        let mut rows = self.rows.write();
        let landed = rows.len() as u64 + 1;
        rows.extend(encoded);
        Ok(landed)
    }
}

/// A remote log stored as a JSON-lines file, one action per line.
///
/// Appends hold an exclusive advisory lock on the file, so several processes
/// can share one log. File I/O runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct FileRemoteLog {
    path: PathBuf,
}

impl FileRemoteLog {
    /// Opens the log at `path`, creating it and its parent directories if
    /// needed.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> SyncResult<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || f(path))
            .await
            .map_err(|e| SyncError::provider_fatal(format!("remote log task failed: {e}")))?
    }
}

fn read_rows(file: &File, skip: usize, take: usize) -> SyncResult<Vec<String>> {
    let mut rows = Vec::new();
    for line in BufReader::new(file)
        .lines()
        .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
        .skip(skip)
        .take(take)
    {
        rows.push(line?);
    }
    Ok(rows)
}

fn count_rows(file: &File) -> SyncResult<u64> {
    let mut count = 0u64;
    for line in BufReader::new(file).lines() {
        if !line?.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

#[async_trait]
impl RemoteLog for FileRemoteLog {
    async fn get_actions(&self, from: u64, to: u64) -> SyncResult<Vec<Action>> {
        check_range(from, to)?;
        let (skip, take) = page_bounds(from, to);

        let rows = self
            .blocking(move |path| {
                let file = File::open(&path)?;
                FileExt::lock_shared(&file)?;
                let rows = read_rows(&file, skip, take);
                FileExt::unlock(&file)?;
                rows
            })
            .await?;

        Ok(rows
            .iter()
            .map(|row| Action::from_json(row))
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn append_actions(&self, actions: &[Action]) -> SyncResult<u64> {
        let mut buf = String::new();
        for row in serialize(actions)? {
            buf.push_str(&row);
            buf.push('\n');
        }

        let landed = self
            .blocking(move |path| {
                let file = OpenOptions::new().read(true).append(true).open(&path)?;
                FileExt::lock_exclusive(&file)?;
                let result = count_rows(&file).and_then(|count| {
                    (&file).write_all(buf.as_bytes())?;
                    file.sync_data()?;
                    Ok(count + 1)
                });
                FileExt::unlock(&file)?;
                result
            })
            .await?;

        tracing::debug!(
            path = %self.path.display(),
            landed,
            rows = actions.len(),
            "appended to remote log"
        );
        Ok(landed)
    }
}
