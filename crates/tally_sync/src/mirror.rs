//! Local prefix copy of the remote log.

use crate::error::{SyncError, SyncResult};
use crate::remote::check_range;
use tally_core::{position_key, Action, CoreError, KvStore};

const ENTRIES: &str = "mirror_entries";
const META: &str = "mirror_meta";
const COUNT: &str = "count";

/// What the mirror ends with: its row count and last row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorTail {
    /// Rows held.
    pub count: u64,
    /// The row at `count`, if any.
    pub last: Option<Action>,
}

/// A local cache of the remote log.
///
/// Rows `1..=count` are always byte-identical to the remote's rows at the
/// same positions. The only way in is [`LogMirror::append`], which refuses
/// to write unless the mirror still ends where the caller thinks it does.
#[derive(Debug)]
pub struct LogMirror {
    kv: KvStore,
}

impl LogMirror {
    /// Wraps an opened table store.
    pub fn open(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Opens an empty mirror held in memory.
    pub fn open_in_memory() -> SyncResult<Self> {
        Ok(Self::open(KvStore::open_in_memory()?))
    }

    /// Number of rows held.
    pub fn actions_count(&self) -> SyncResult<u64> {
        read_count(self.kv.get(META, COUNT))
    }

    /// Returns rows `[from, to]` (1-based, inclusive), or fewer past the end.
    pub fn actions(&self, from: u64, to: u64) -> SyncResult<Vec<Action>> {
        check_range(from, to)?;
        let end = to.min(self.actions_count()?);
        (from..=end)
            .map(|position| self.row(position))
            .collect()
    }

    /// Current count and last row.
    pub fn tail(&self) -> SyncResult<MirrorTail> {
        let count = self.actions_count()?;
        let last = if count == 0 {
            None
        } else {
            Some(self.row(count)?)
        };
        Ok(MirrorTail { count, last })
    }

    fn row(&self, position: u64) -> SyncResult<Action> {
        let bytes = self.kv.get(ENTRIES, &position_key(position)).ok_or_else(|| {
            CoreError::Corrupted {
                offset: position,
                message: "mirror row missing".into(),
            }
        })?;
        decode_row(&bytes)
    }

    /// Compare-and-append.
    ///
    /// `from` is where the first of `actions` should land and `expected` is
    /// what the caller believes the mirror ends with. With `from == 1` the
    /// mirror must be empty. Otherwise `expected.count` must be `from - 1`
    /// and match the mirror's count and last row.
    ///
    /// # Errors
    ///
    /// [`SyncError::MirrorConflict`] on any mismatch. Nothing is written.
    pub fn append(&self, actions: &[Action], from: u64, expected: &MirrorTail) -> SyncResult<()> {
        if from == 0 {
            return Err(SyncError::InvalidRange { from, to: 0 });
        }

        let accepted = self.kv.transaction(|txn| {
            let count = read_count(txn.get(META, COUNT)).map_err(core_error)?;
            let matches = if from == 1 {
                count == 0 && expected.count == 0
            } else {
                let last = txn
                    .get(ENTRIES, &position_key(count))
                    .map(|bytes| decode_row(&bytes).map_err(core_error))
                    .transpose()?;
                expected.count == from - 1 && count == expected.count && last == expected.last
            };
            if !matches {
                return Ok(Err(count));
            }

            for (offset, action) in (from..).zip(actions) {
                txn.put(ENTRIES, &position_key(offset), action.to_json()?.into_bytes());
            }
            if !actions.is_empty() {
                let count = from - 1 + actions.len() as u64;
                txn.put(META, COUNT, count.to_le_bytes().to_vec());
            }
            Ok(Ok(()))
        })?;

        match accepted {
            Ok(()) => {
                tracing::debug!(from, rows = actions.len(), "mirror extended");
                Ok(())
            }
            Err(count) => {
                tracing::warn!(from, count, "mirror tail moved; append refused");
                Err(SyncError::MirrorConflict { from, count })
            }
        }
    }
}

fn read_count(bytes: Option<Vec<u8>>) -> SyncResult<u64> {
    let Some(bytes) = bytes else {
        return Ok(0);
    };
    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| CoreError::Corrupted {
        offset: 0,
        message: "mirror count is not 8 bytes".into(),
    })?;
    Ok(u64::from_le_bytes(raw))
}

fn decode_row(bytes: &[u8]) -> SyncResult<Action> {
    let text = std::str::from_utf8(bytes).map_err(CoreError::codec)?;
    Ok(Action::from_json(text)?)
}

fn core_error(err: SyncError) -> CoreError {
    match err {
        SyncError::Core(err) => err,
        other => CoreError::codec(other),
    }
}
