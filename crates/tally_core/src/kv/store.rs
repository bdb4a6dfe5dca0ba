//! Durable transactional table store.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::kv::record::{self, Scan, Write};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use tally_storage::{InMemoryBackend, StorageBackend};

type Table = BTreeMap<String, Vec<u8>>;
type Tables = BTreeMap<String, Table>;

/// Named tables of `key -> bytes` made durable by an append-only commit log.
///
/// The whole dataset lives in memory; the backend only holds the history of
/// committed write sets, replayed on open. Keys iterate in ascending order,
/// which is the stable sort key callers rely on for queues.
///
/// # Example
///
/// ```rust
/// use tally_core::KvStore;
///
/// let store = KvStore::open_in_memory().unwrap();
/// store
///     .transaction(|txn| {
///         txn.put("accounts", "savings", b"...".to_vec());
///         Ok(())
///     })
///     .unwrap();
/// assert!(store.get("accounts", "savings").is_some());
/// ```
pub struct KvStore {
    backend: Mutex<Box<dyn StorageBackend>>,
    tables: RwLock<Tables>,
    config: StoreConfig,
}

impl KvStore {
    /// Opens a store over `backend`, replaying its commit log.
    ///
    /// A torn final record (crash mid-append) is cut off. A damaged record
    /// with more data after it is reported as corruption.
    ///
    /// # Errors
    ///
    /// Storage errors, or [`CoreError::Corrupted`].
    pub fn open(mut backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        let bytes = backend.read_all()?;

        let mut tables = Tables::new();
        let mut offset = 0usize;
        let mut commits = 0usize;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            match record::scan(rest, offset as u64)? {
                Scan::Record(writes, len) => {
                    apply(&mut tables, writes);
                    offset += len;
                    commits += 1;
                }
                Scan::Incomplete => {
                    tracing::warn!(offset, dropped = rest.len(), "truncating torn commit record");
                    backend.truncate(offset as u64)?;
                    break;
                }
                Scan::BadChecksum => {
                    let framed = framed_len(rest);
                    if offset + framed < bytes.len() {
                        return Err(CoreError::Corrupted {
                            offset: offset as u64,
                            message: "checksum mismatch".into(),
                        });
                    }
                    tracing::warn!(offset, "truncating commit record with bad checksum");
                    backend.truncate(offset as u64)?;
                    break;
                }
            }
        }

        tracing::debug!(commits, bytes = offset, "commit log replayed");

        Ok(Self {
            backend: Mutex::new(backend),
            tables: RwLock::new(tables),
            config,
        })
    }

    /// Opens an empty store backed by memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Returns the configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Reads one row.
    pub fn get(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        self.tables.read().get(table)?.get(key).cloned()
    }

    /// Reads a whole table in key order.
    pub fn scan(&self, table: &str) -> Vec<(String, Vec<u8>)> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of rows in a table.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Runs `f` inside a transaction.
    ///
    /// If `f` returns `Ok`, its writes are appended to the commit log as one
    /// record and become visible together. If it returns `Err`, or the append
    /// fails, nothing changes.
    ///
    /// Transactions are serialized; readers wait while one is running.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> CoreResult<T>,
    {
        let mut tables = self.tables.write();

        let (value, writes) = {
            let mut txn = Txn {
                base: &tables,
                writes: BTreeMap::new(),
            };
            let value = f(&mut txn)?;
            (value, txn.into_writes())
        };

        if writes.is_empty() {
            return Ok(value);
        }

        let data = record::encode(&writes)?;
        {
            let mut backend = self.backend.lock();
            backend.append(&data)?;
            if self.config.sync_on_commit {
                backend.sync()?;
            } else {
                backend.flush()?;
            }
        }

        apply(&mut tables, writes);
        Ok(value)
    }

    /// Flushes the commit log.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Size of the commit log in bytes.
    pub fn log_size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().len()?)
    }
}

impl fmt::Debug for KvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("KvStore")
            .field("tables", &tables.keys().collect::<Vec<_>>())
            .field("sync_on_commit", &self.config.sync_on_commit)
            .finish()
    }
}

fn apply(tables: &mut Tables, writes: Vec<Write>) {
    for write in writes {
        match write {
            Write::Put { table, key, value } => {
                tables.entry(table).or_default().insert(key, value);
            }
            Write::Delete { table, key } => {
                if let Some(rows) = tables.get_mut(&table) {
                    rows.remove(&key);
                }
            }
        }
    }
}

fn framed_len(buf: &[u8]) -> usize {
    let payload_len = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]) as usize;
    record::HEADER_SIZE + payload_len + record::CRC_SIZE
}

/// An open transaction: reads see committed rows overlaid with this
/// transaction's own writes.
pub struct Txn<'a> {
    base: &'a Tables,
    writes: BTreeMap<(String, String), Option<Vec<u8>>>,
}

impl Txn<'_> {
    /// Reads one row.
    pub fn get(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        match self.writes.get(&(table.to_string(), key.to_string())) {
            Some(pending) => pending.clone(),
            None => self.base.get(table)?.get(key).cloned(),
        }
    }

    /// Reads a whole table in key order.
    pub fn scan(&self, table: &str) -> Vec<(String, Vec<u8>)> {
        let mut rows: Table = self.base.get(table).cloned().unwrap_or_default();
        for ((t, key), pending) in &self.writes {
            if t != table {
                continue;
            }
            match pending {
                Some(value) => {
                    rows.insert(key.clone(), value.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }
        rows.into_iter().collect()
    }

    /// Stages a put.
    pub fn put(&mut self, table: &str, key: &str, value: Vec<u8>) {
        self.writes
            .insert((table.to_string(), key.to_string()), Some(value));
    }

    /// Stages a delete.
    pub fn delete(&mut self, table: &str, key: &str) {
        self.writes.insert((table.to_string(), key.to_string()), None);
    }

    fn into_writes(self) -> Vec<Write> {
        self.writes
            .into_iter()
            .map(|((table, key), pending)| match pending {
                Some(value) => Write::Put { table, key, value },
                None => Write::Delete { table, key },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &KvStore, table: &str, key: &str, value: &[u8]) {
        store
            .transaction(|txn| {
                txn.put(table, key, value.to_vec());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn committed_rows_are_visible() {
        let store = KvStore::open_in_memory().unwrap();
        put(&store, "accounts", "savings", b"100");

        assert_eq!(store.get("accounts", "savings"), Some(b"100".to_vec()));
        assert_eq!(store.len("accounts"), 1);
        assert!(store.is_empty("transfers"));
    }

    #[test]
    fn failed_transaction_writes_nothing() {
        let store = KvStore::open_in_memory().unwrap();
        let before = store.log_size().unwrap();

        let result: CoreResult<()> = store.transaction(|txn| {
            txn.put("accounts", "savings", b"100".to_vec());
            Err(CoreError::MalformedAction("boom".into()))
        });

        assert!(result.is_err());
        assert!(store.get("accounts", "savings").is_none());
        assert_eq!(store.log_size().unwrap(), before);
    }

    #[test]
    fn reads_see_own_writes() {
        let store = KvStore::open_in_memory().unwrap();
        put(&store, "queue", "1", b"a");
        put(&store, "queue", "2", b"b");

        store
            .transaction(|txn| {
                txn.delete("queue", "1");
                txn.put("queue", "3", b"c".to_vec());
                assert!(txn.get("queue", "1").is_none());
                let keys: Vec<_> = txn.scan("queue").into_iter().map(|(k, _)| k).collect();
                assert_eq!(keys, vec!["2", "3"]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn reopen_replays_commits() {
        let backend = InMemoryBackend::new();
        {
            let store = KvStore::open(Box::new(backend.clone()), StoreConfig::default()).unwrap();
            put(&store, "accounts", "savings", b"100");
            put(&store, "accounts", "food", b"0");
            store
                .transaction(|txn| {
                    txn.delete("accounts", "food");
                    Ok(())
                })
                .unwrap();
        }

        let store = KvStore::open(Box::new(backend), StoreConfig::default()).unwrap();
        assert_eq!(store.get("accounts", "savings"), Some(b"100".to_vec()));
        assert!(store.get("accounts", "food").is_none());
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        {
            let store = KvStore::open(Box::new(backend.clone()), StoreConfig::default()).unwrap();
            put(&store, "accounts", "savings", b"100");
        }
        let good_len = backend.data().len();

        let mut torn = backend.data();
        let partial = record::encode(&[Write::Put {
            table: "accounts".into(),
            key: "food".into(),
            value: b"0".to_vec(),
        }])
        .unwrap();
        torn.extend_from_slice(&partial[..partial.len() / 2]);

        let torn_backend = InMemoryBackend::with_data(torn);
        let store = KvStore::open(Box::new(torn_backend.clone()), StoreConfig::default()).unwrap();

        assert!(store.get("accounts", "savings").is_some());
        assert!(store.get("accounts", "food").is_none());
        assert_eq!(torn_backend.data().len(), good_len);
    }

    #[test]
    fn damaged_middle_record_is_corruption() {
        let backend = InMemoryBackend::new();
        {
            let store = KvStore::open(Box::new(backend.clone()), StoreConfig::default()).unwrap();
            put(&store, "accounts", "savings", b"100");
            put(&store, "accounts", "food", b"0");
        }

        let mut data = backend.data();
        data[record::HEADER_SIZE + 1] ^= 0xFF;

        let result = KvStore::open(
            Box::new(InMemoryBackend::with_data(data)),
            StoreConfig::default(),
        );
        assert!(matches!(result, Err(CoreError::Corrupted { offset: 0, .. })));
    }
}
