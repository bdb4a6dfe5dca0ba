//! Data directory management.
//!
//! ```text
//! <data-dir>/
//! ├─ LOCK               # Advisory lock, one tally process at a time
//! ├─ ACTIVE             # File name of the ledger in use
//! ├─ ledger-<uuid>.log  # Ledger commit log
//! └─ mirror.log         # Mirror commit log
//! ```
//!
//! A rebuild produces a new ledger file. `ACTIVE` is switched to it with a
//! write-then-rename, and the old file is removed afterwards.

use super::{CliError, CliResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_core::{CoreResult, KvStore, LedgerStore, StoreConfig};
use tally_storage::FileBackend;
use tally_sync::{LedgerFactory, LogMirror};

const LOCK_FILE: &str = "LOCK";
const ACTIVE_FILE: &str = "ACTIVE";
const ACTIVE_TEMP: &str = "ACTIVE.tmp";
const MIRROR_FILE: &str = "mirror.log";

/// An opened data directory holding the active ledger.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    active: String,
    ledger: Arc<LedgerStore>,
    _lock_file: File,
}

impl Workspace {
    /// Opens the data directory at `path`, creating it on first use.
    ///
    /// # Errors
    ///
    /// [`CliError::Locked`] if another process has the directory open.
    pub fn open(path: &Path) -> CliResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CliError::Locked(path.to_path_buf()));
        }

        let active = match fs::read_to_string(path.join(ACTIVE_FILE)) {
            Ok(name) => name.trim().to_string(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let name = new_ledger_name();
                write_active(path, &name)?;
                tracing::info!(
                    data_dir = %path.display(),
                    ledger = %name,
                    "initialized data directory"
                );
                name
            }
            Err(err) => return Err(err.into()),
        };
        if active.is_empty() || active.contains(|c: char| c == '/' || c == '\\') {
            return Err(CliError::Usage(format!(
                "{} does not name a ledger file",
                path.join(ACTIVE_FILE).display()
            )));
        }

        let ledger = Arc::new(open_ledger(&path.join(&active))?);
        tracing::debug!(ledger = %active, "opened ledger");

        Ok(Self {
            path: path.to_path_buf(),
            active,
            ledger,
            _lock_file: lock_file,
        })
    }

    /// Path of the data directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the ledger in use.
    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// The ledger in use.
    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    /// Opens the mirror log.
    pub fn open_mirror(&self) -> CliResult<LogMirror> {
        Ok(LogMirror::open(open_kv(&self.path.join(MIRROR_FILE))?))
    }

    /// A factory creating ledger files in this directory.
    pub fn factory(&self) -> StoreFactory {
        StoreFactory {
            dir: self.path.clone(),
            created: Arc::new(Mutex::new(None)),
        }
    }

    /// Makes the ledger `factory` created the active one.
    pub fn adopt(&mut self, store: Arc<LedgerStore>, factory: &StoreFactory) -> CliResult<()> {
        let Some(name) = factory.take_created() else {
            return Err(CliError::Usage(
                "rebuilt ledger was not created in this data directory".into(),
            ));
        };

        write_active(&self.path, &name)?;
        let old = std::mem::replace(&mut self.active, name);
        self.ledger = store;

        if let Err(err) = fs::remove_file(self.path.join(&old)) {
            tracing::warn!(ledger = %old, error = %err, "could not remove replaced ledger");
        }
        tracing::info!(ledger = %self.active, replaced = %old, "switched to rebuilt ledger");
        Ok(())
    }
}

/// Creates empty ledgers as new files in the data directory.
///
/// Remembers the last file it created so the caller can adopt it, or
/// discard it when the run that asked for it failed.
#[derive(Debug, Clone)]
pub struct StoreFactory {
    dir: PathBuf,
    created: Arc<Mutex<Option<String>>>,
}

impl StoreFactory {
    fn take_created(&self) -> Option<String> {
        self.created.lock().take()
    }

    /// Removes a ledger file created for a run that did not finish.
    pub fn discard(&self) {
        if let Some(name) = self.take_created() {
            if let Err(err) = fs::remove_file(self.dir.join(&name)) {
                tracing::warn!(ledger = %name, error = %err, "could not remove abandoned ledger");
            }
        }
    }
}

impl LedgerFactory for StoreFactory {
    fn create(&self) -> CoreResult<LedgerStore> {
        let name = new_ledger_name();
        let store = open_ledger(&self.dir.join(&name))?;
        // A second rebuild in the same run replaces the first file.
        if let Some(previous) = self.created.lock().replace(name) {
            if let Err(err) = fs::remove_file(self.dir.join(&previous)) {
                tracing::warn!(
                    ledger = %previous,
                    error = %err,
                    "could not remove replaced ledger"
                );
            }
        }
        Ok(store)
    }
}

fn new_ledger_name() -> String {
    format!("ledger-{}.log", uuid::Uuid::new_v4())
}

fn write_active(dir: &Path, name: &str) -> CliResult<()> {
    let temp = dir.join(ACTIVE_TEMP);
    let mut file = File::create(&temp)?;
    file.write_all(name.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp, dir.join(ACTIVE_FILE))?;
    Ok(())
}

fn open_kv(path: &Path) -> CoreResult<KvStore> {
    let backend = FileBackend::open(path)?;
    KvStore::open(Box::new(backend), StoreConfig::default())
}

fn open_ledger(path: &Path) -> CoreResult<LedgerStore> {
    Ok(LedgerStore::open(open_kv(path)?))
}
