//! The event-sourced ledger store.
//!
//! A [`LedgerStore`] owns a [`KvStore`] with these tables:
//!
//! - `accounts`, `transfers`, `categories`, `settings`: materialized records (CBOR)
//! - `meta`: `actionsCount`, `lastAction`, `nextLocalSeq`, `rebuildRequested`
//! - `local_actions`: actions created on this device and not yet confirmed
//!   by the shared log, keyed by a zero-padded sequence number (JSON)
//! - `pushed_actions`: actions taken off the queue and appended to the shared
//!   log whose place in it this device has not confirmed yet, same keys
//!
//! Every call to [`LedgerStore::process_actions`] is one store transaction.

mod apply;
mod query;

pub use query::{CategoryTotal, DateRange, TransferFilter};

use crate::action::Action;
use crate::error::{CoreError, CoreResult, Rejection};
use crate::kv::{KvStore, Txn};
use crate::types::position_key;
use apply::ApplyError;
use serde::de::DeserializeOwned;
use serde::Serialize;

const META: &str = "meta";
const LOCAL_ACTIONS: &str = "local_actions";
const PUSHED_ACTIONS: &str = "pushed_actions";

const ACTIONS_COUNT: &str = "actionsCount";
const LAST_ACTION: &str = "lastAction";
const NEXT_LOCAL_SEQ: &str = "nextLocalSeq";
const REBUILD_REQUESTED: &str = "rebuildRequested";

/// Where a batch of actions comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Created on this device. Applied actions are queued for publishing.
    Local,
    /// Read from the shared log. Never queued.
    Remote,
}

/// What happened to one action of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action changed the ledger.
    Applied,
    /// The action was skipped.
    Rejected(Rejection),
}

impl ActionOutcome {
    /// Returns true if the action was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Per-action outcomes of one [`LedgerStore::process_actions`] call, in
/// input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    /// One outcome per input action.
    pub outcomes: Vec<ActionOutcome>,
}

impl ProcessReport {
    /// Number of applied actions.
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_applied()).count()
    }

    /// Number of rejected actions.
    pub fn rejected(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    /// The rejections, in input order.
    pub fn rejections(&self) -> impl Iterator<Item = &Rejection> {
        self.outcomes.iter().filter_map(|o| match o {
            ActionOutcome::Rejected(r) => Some(r),
            ActionOutcome::Applied => None,
        })
    }
}

/// Durable local state machine over ordered actions.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use tally_core::{Account, Action, LedgerStore, Origin};
///
/// let ledger = LedgerStore::open_in_memory().unwrap();
/// let savings = Account {
///     id: "savings".into(),
///     name: "Savings".into(),
///     initial_balance: 100.0,
///     modified_at: Utc::now(),
/// };
/// let action = Action::create_account(&savings).unwrap();
///
/// ledger.process_actions(&[action], Origin::Local).unwrap();
/// assert_eq!(ledger.account_balance("savings").unwrap(), Some(100.0));
/// assert_eq!(ledger.local_actions_count(), 1);
/// ```
#[derive(Debug)]
pub struct LedgerStore {
    kv: KvStore,
}

impl LedgerStore {
    /// Wraps an opened table store.
    pub fn open(kv: KvStore) -> Self {
        Self { kv }
    }

    /// Opens an empty ledger held in memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Ok(Self::open(KvStore::open_in_memory()?))
    }

    /// Applies `actions` in order as one atomic batch.
    ///
    /// Each action is decoded, validated and checked against the stored state.
    /// An action that fails validation or loses a conflict is rejected: it is
    /// logged, reported in the returned [`ProcessReport`], and processing
    /// continues. Applied actions bump `actionsCount`, become `lastAction` and,
    /// for [`Origin::Local`], join the local queue.
    ///
    /// # Errors
    ///
    /// Structural failures (unsupported version) and storage failures abort
    /// the whole batch; nothing from it is kept.
    pub fn process_actions(&self, actions: &[Action], origin: Origin) -> CoreResult<ProcessReport> {
        if actions.is_empty() {
            return Ok(ProcessReport::default());
        }

        let report = self.kv.transaction(|txn| {
            let mut count: u64 = read_meta(txn.get(META, ACTIONS_COUNT))?;
            let mut next_seq: u64 = read_meta(txn.get(META, NEXT_LOCAL_SEQ))?;
            let mut last_applied = None;
            let mut report = ProcessReport::default();

            for action in actions {
                match apply::apply(txn, action) {
                    Ok(()) => {
                        count += 1;
                        last_applied = Some(action);
                        if origin == Origin::Local {
                            next_seq += 1;
                            txn.put(LOCAL_ACTIONS, &position_key(next_seq), action_bytes(action)?);
                        }
                        report.outcomes.push(ActionOutcome::Applied);
                    }
                    Err(ApplyError::Rejected(rejection)) => {
                        tracing::warn!(
                            action_type = %action.action_type(),
                            ?origin,
                            %rejection,
                            "action rejected"
                        );
                        report.outcomes.push(ActionOutcome::Rejected(rejection));
                    }
                    Err(ApplyError::Fatal(err)) => return Err(err),
                }
            }

            if let Some(action) = last_applied {
                txn.put(META, ACTIONS_COUNT, to_cbor(&count)?);
                txn.put(META, LAST_ACTION, action_bytes(action)?);
                if origin == Origin::Local {
                    txn.put(META, NEXT_LOCAL_SEQ, to_cbor(&next_seq)?);
                }
            }
            Ok(report)
        })?;

        tracing::debug!(
            ?origin,
            applied = report.applied(),
            rejected = report.rejected(),
            "batch committed"
        );
        Ok(report)
    }

    /// Total number of actions ever applied.
    pub fn actions_count(&self) -> CoreResult<u64> {
        read_meta(self.kv.get(META, ACTIONS_COUNT))
    }

    /// The most recently applied action.
    pub fn last_action(&self) -> CoreResult<Option<Action>> {
        self.kv
            .get(META, LAST_ACTION)
            .map(|bytes| action_from_bytes(&bytes))
            .transpose()
    }

    /// Returns queued local actions at 1-based inclusive queue positions
    /// `[from, to]`. Returns fewer if the queue is shorter.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidRange`] if `from == 0` or `to < from`.
    pub fn local_actions(&self, from: u64, to: u64) -> CoreResult<Vec<Action>> {
        check_range(from, to)?;
        queue_slice(self.kv.scan(LOCAL_ACTIONS), from, to)
            .map(|(_, bytes)| action_from_bytes(&bytes))
            .collect()
    }

    /// Drops queued local actions at 1-based inclusive queue positions
    /// `[from, to]` and returns how many were removed.
    ///
    /// Positions are re-based afterwards: the first remaining action is at 1.
    pub fn delete_local_actions(&self, from: u64, to: u64) -> CoreResult<usize> {
        check_range(from, to)?;
        let removed = self.kv.transaction(|txn| {
            let keys: Vec<String> = queue_slice(txn.scan(LOCAL_ACTIONS), from, to)
                .map(|(key, _)| key)
                .collect();
            for key in &keys {
                txn.delete(LOCAL_ACTIONS, key);
            }
            Ok(keys.len())
        })?;
        tracing::debug!(from, to, removed, "local actions confirmed");
        Ok(removed)
    }

    /// Number of queued local actions.
    pub fn local_actions_count(&self) -> u64 {
        self.kv.len(LOCAL_ACTIONS) as u64
    }

    /// The whole local queue in order.
    pub fn all_local_actions(&self) -> CoreResult<Vec<Action>> {
        decode_rows(self.kv.scan(LOCAL_ACTIONS))
    }

    /// Takes queue positions `[from, to]` off the queue and keeps them as
    /// pushed until [`LedgerStore::clear_pushed`].
    ///
    /// Like [`LedgerStore::delete_local_actions`], but the actions stay
    /// readable through [`LedgerStore::pushed_actions`] so a sync interrupted
    /// before it saw them in the shared log can still recognize them.
    pub fn stash_pushed(&self, from: u64, to: u64) -> CoreResult<usize> {
        check_range(from, to)?;
        let moved = self.kv.transaction(|txn| {
            let rows: Vec<_> = queue_slice(txn.scan(LOCAL_ACTIONS), from, to).collect();
            for (key, bytes) in &rows {
                txn.delete(LOCAL_ACTIONS, key);
                txn.put(PUSHED_ACTIONS, key, bytes.clone());
            }
            Ok(rows.len())
        })?;
        tracing::debug!(from, to, moved, "local actions pushed");
        Ok(moved)
    }

    /// Pushed actions not yet confirmed, in queue order.
    pub fn pushed_actions(&self) -> CoreResult<Vec<Action>> {
        decode_rows(self.kv.scan(PUSHED_ACTIONS))
    }

    /// Number of pushed actions not yet confirmed.
    pub fn pushed_actions_count(&self) -> u64 {
        self.kv.len(PUSHED_ACTIONS) as u64
    }

    /// Forgets every pushed action; their place in the shared log is known.
    pub fn clear_pushed(&self) -> CoreResult<usize> {
        let cleared = self.kv.transaction(|txn| {
            let keys: Vec<String> = txn
                .scan(PUSHED_ACTIONS)
                .into_iter()
                .map(|(key, _)| key)
                .collect();
            for key in &keys {
                txn.delete(PUSHED_ACTIONS, key);
            }
            Ok(keys.len())
        })?;
        if cleared > 0 {
            tracing::debug!(cleared, "pushed actions confirmed");
        }
        Ok(cleared)
    }

    /// Records that this ledger must be replaced by a rebuilt one.
    ///
    /// The mark survives restarts; the ledger that carries it is meant to be
    /// discarded, so nothing clears it.
    pub fn request_rebuild(&self) -> CoreResult<()> {
        self.kv.transaction(|txn| {
            txn.put(META, REBUILD_REQUESTED, to_cbor(&true)?);
            Ok(())
        })
    }

    /// Whether [`LedgerStore::request_rebuild`] was called on this ledger.
    pub fn rebuild_requested(&self) -> CoreResult<bool> {
        read_meta(self.kv.get(META, REBUILD_REQUESTED))
    }
}

fn decode_rows(rows: Vec<(String, Vec<u8>)>) -> CoreResult<Vec<Action>> {
    rows.into_iter()
        .map(|(_, bytes)| action_from_bytes(&bytes))
        .collect()
}

fn check_range(from: u64, to: u64) -> CoreResult<()> {
    if from == 0 || to < from {
        return Err(CoreError::InvalidRange { from, to });
    }
    Ok(())
}

fn queue_slice(
    rows: Vec<(String, Vec<u8>)>,
    from: u64,
    to: u64,
) -> impl Iterator<Item = (String, Vec<u8>)> {
    let skip = usize::try_from(from - 1).unwrap_or(usize::MAX);
    let take = usize::try_from(to - from + 1).unwrap_or(usize::MAX);
    rows.into_iter().skip(skip).take(take)
}

fn read_meta<T: DeserializeOwned + Default>(bytes: Option<Vec<u8>>) -> CoreResult<T> {
    bytes.map_or_else(|| Ok(T::default()), |b| from_cbor(&b))
}

fn action_bytes(action: &Action) -> CoreResult<Vec<u8>> {
    Ok(action.to_json()?.into_bytes())
}

fn action_from_bytes(bytes: &[u8]) -> CoreResult<Action> {
    serde_json::from_slice(bytes).map_err(CoreError::codec)
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(CoreError::codec)?;
    Ok(bytes)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(CoreError::codec)
}

pub(crate) fn load<E: crate::entity::Record>(txn: &Txn<'_>, id: &str) -> CoreResult<Option<E>> {
    txn.get(E::TABLE, id).map(|bytes| from_cbor(&bytes)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Account, Category, CategoryKind, Deletion, InitialSavings, Transfer};
    use crate::error::{EntityConflict, ValidationError};
    use crate::types::{EntityKind, Timestamp};
    use crate::StoreConfig;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use serde_json::json;
    use tally_storage::InMemoryBackend;

    fn ts(hours: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn account(id: &str, initial_balance: f64, at: i64) -> Action {
        Action::create_account(&Account {
            id: id.into(),
            name: id.to_uppercase(),
            initial_balance,
            modified_at: ts(at),
        })
        .unwrap()
    }

    fn transfer(id: &str, from: &str, to: &str, amount: f64, at: i64) -> Transfer {
        Transfer {
            id: id.into(),
            from: Some(from.into()),
            to: Some(to.into()),
            amount,
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            description: String::new(),
            category_id: None,
            modified_at: ts(at),
            deleted: false,
        }
    }

    fn seeded() -> LedgerStore {
        let ledger = LedgerStore::open_in_memory().unwrap();
        ledger
            .process_actions(
                &[
                    account("savings", 100.0, 0),
                    account("food", 0.0, 0),
                    Action::create_transfer(&transfer("t1", "savings", "food", 30.0, 1)).unwrap(),
                ],
                Origin::Local,
            )
            .unwrap();
        ledger
    }

    #[test]
    fn transfer_moves_money() {
        let ledger = seeded();

        assert_eq!(ledger.account_balance("savings").unwrap(), Some(70.0));
        assert_eq!(ledger.account_balance("food").unwrap(), Some(30.0));
        assert_eq!(ledger.actions_count().unwrap(), 3);
        assert_eq!(ledger.local_actions_count(), 3);
    }

    #[test]
    fn stale_update_is_ignored() {
        let ledger = seeded();
        let before = ledger.transfer("t1").unwrap();

        let report = ledger
            .process_actions(
                &[Action::update_transfer(&transfer("t1", "savings", "food", 99.0, 0)).unwrap()],
                Origin::Local,
            )
            .unwrap();

        assert!(matches!(
            report.outcomes[0],
            ActionOutcome::Rejected(Rejection::Conflict(EntityConflict::Stale { .. }))
        ));
        assert_eq!(ledger.transfer("t1").unwrap(), before);
        assert_eq!(ledger.account_balance("savings").unwrap(), Some(70.0));
        assert_eq!(ledger.actions_count().unwrap(), 3);
        assert_eq!(ledger.local_actions_count(), 3);
    }

    #[test]
    fn equal_timestamp_is_a_tie() {
        let ledger = seeded();
        let report = ledger
            .process_actions(
                &[Action::update_transfer(&transfer("t1", "savings", "food", 99.0, 1)).unwrap()],
                Origin::Remote,
            )
            .unwrap();
        assert_eq!(report.rejected(), 1);
        assert_eq!(ledger.transfer("t1").unwrap().unwrap().amount, 30.0);
    }

    #[test]
    fn update_undeletes() {
        let ledger = seeded();
        ledger
            .process_actions(
                &[Action::delete_transfer(&Deletion {
                    id: "t1".into(),
                    modified_at: ts(2),
                })
                .unwrap()],
                Origin::Local,
            )
            .unwrap();
        assert!(ledger.transfer("t1").unwrap().unwrap().deleted);
        assert_eq!(ledger.account_balance("savings").unwrap(), Some(100.0));

        ledger
            .process_actions(
                &[Action::update_transfer(&transfer("t1", "savings", "food", 45.0, 3)).unwrap()],
                Origin::Local,
            )
            .unwrap();

        let stored = ledger.transfer("t1").unwrap().unwrap();
        assert!(!stored.deleted);
        assert_eq!(stored.amount, 45.0);
        assert_eq!(ledger.account_balance("savings").unwrap(), Some(55.0));
    }

    #[test]
    fn second_create_never_overwrites() {
        let ledger = seeded();
        let report = ledger
            .process_actions(&[account("savings", 5000.0, 10)], Origin::Remote)
            .unwrap();

        assert!(matches!(
            report.outcomes[0],
            ActionOutcome::Rejected(Rejection::Conflict(EntityConflict::AlreadyExists {
                kind: EntityKind::Account,
                ..
            }))
        ));
        assert_eq!(
            ledger.account("savings").unwrap().unwrap().initial_balance,
            100.0
        );
    }

    #[test]
    fn rejections_do_not_stop_the_batch() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        let orphan = Action::create_transfer(&transfer("t1", "ghost", "food", 1.0, 1)).unwrap();
        let bad_payload = Action::new(
            crate::ActionType::CategoriesCreate,
            json!({"id": "c1", "name": "Fun", "kind": "luxury", "modifiedAt": ts(0)}),
        );

        let report = ledger
            .process_actions(
                &[orphan, bad_payload, account("food", 0.0, 0)],
                Origin::Local,
            )
            .unwrap();

        assert_eq!(report.applied(), 1);
        assert!(matches!(
            report.outcomes[0],
            ActionOutcome::Rejected(Rejection::Validation(ValidationError::NotFound { .. }))
        ));
        assert!(matches!(
            report.outcomes[1],
            ActionOutcome::Rejected(Rejection::Validation(ValidationError::Payload(_)))
        ));
        assert_eq!(ledger.actions_count().unwrap(), 1);
        assert_eq!(ledger.local_actions_count(), 1);
        assert_eq!(
            ledger.last_action().unwrap(),
            Some(account("food", 0.0, 0))
        );
    }

    #[test]
    fn unsupported_version_aborts_the_batch() {
        let ledger = seeded();
        let size = ledger.kv.log_size().unwrap();
        let future = Action::from_parts(7, crate::ActionType::AccountsCreate, json!({}));

        let result = ledger.process_actions(&[account("rent", 0.0, 5), future], Origin::Local);

        assert!(matches!(
            result,
            Err(CoreError::UnsupportedVersion { version: 7, .. })
        ));
        assert!(ledger.account("rent").unwrap().is_none());
        assert_eq!(ledger.actions_count().unwrap(), 3);
        assert_eq!(ledger.kv.log_size().unwrap(), size);
    }

    #[test]
    fn remote_actions_are_not_queued() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        ledger
            .process_actions(&[account("savings", 1.0, 0)], Origin::Remote)
            .unwrap();
        assert_eq!(ledger.actions_count().unwrap(), 1);
        assert_eq!(ledger.local_actions_count(), 0);
    }

    #[test]
    fn local_queue_ranges() {
        let ledger = seeded();

        let page = ledger.local_actions(1, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0], account("savings", 100.0, 0));
        assert_eq!(ledger.local_actions(2, 10).unwrap().len(), 2);
        assert!(ledger.local_actions(4, 10).unwrap().is_empty());
        assert!(matches!(
            ledger.local_actions(0, 1),
            Err(CoreError::InvalidRange { .. })
        ));

        assert_eq!(ledger.delete_local_actions(1, 2).unwrap(), 2);
        let rest = ledger.all_local_actions().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].action_type(), crate::ActionType::TransfersCreate);
        assert_eq!(ledger.local_actions(1, 1).unwrap(), rest);

        ledger
            .process_actions(&[account("rent", 0.0, 4)], Origin::Local)
            .unwrap();
        let queue = ledger.all_local_actions().unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[1], account("rent", 0.0, 4));
    }

    #[test]
    fn state_survives_reopen() {
        let backend = InMemoryBackend::new();
        {
            let kv = KvStore::open(Box::new(backend.clone()), StoreConfig::default()).unwrap();
            let ledger = LedgerStore::open(kv);
            ledger
                .process_actions(
                    &[
                        account("savings", 100.0, 0),
                        Action::create_category(&Category {
                            id: "groceries".into(),
                            name: "Groceries".into(),
                            kind: CategoryKind::Expense,
                            modified_at: ts(0),
                            deleted: false,
                        })
                        .unwrap(),
                        Action::update_initial_savings(&InitialSavings {
                            amount: 250.0,
                            modified_at: ts(0),
                        })
                        .unwrap(),
                    ],
                    Origin::Local,
                )
                .unwrap();
            ledger.delete_local_actions(1, 1).unwrap();
        }

        let kv = KvStore::open(Box::new(backend), StoreConfig::default()).unwrap();
        let ledger = LedgerStore::open(kv);
        assert_eq!(ledger.actions_count().unwrap(), 3);
        assert_eq!(ledger.local_actions_count(), 2);
        assert_eq!(ledger.categories().unwrap().len(), 1);
        assert_eq!(ledger.total_balance().unwrap(), 350.0);
    }

    #[test]
    fn pushed_actions_leave_queue_but_stay_readable() {
        let ledger = LedgerStore::open_in_memory().unwrap();
        ledger
            .process_actions(
                &[
                    account("savings", 100.0, 0),
                    account("food", 0.0, 1),
                    account("rent", 0.0, 2),
                ],
                Origin::Local,
            )
            .unwrap();

        assert_eq!(ledger.stash_pushed(1, 2).unwrap(), 2);
        assert_eq!(ledger.local_actions_count(), 1);
        assert_eq!(ledger.local_actions(1, 1).unwrap(), vec![account("rent", 0.0, 2)]);
        assert_eq!(
            ledger.pushed_actions().unwrap(),
            vec![account("savings", 100.0, 0), account("food", 0.0, 1)]
        );

        assert_eq!(ledger.stash_pushed(1, 1).unwrap(), 1);
        assert_eq!(ledger.pushed_actions_count(), 3);
        assert_eq!(ledger.local_actions_count(), 0);

        assert_eq!(ledger.clear_pushed().unwrap(), 3);
        assert!(ledger.pushed_actions().unwrap().is_empty());
        assert_eq!(ledger.clear_pushed().unwrap(), 0);
        assert_eq!(ledger.actions_count().unwrap(), 3);
    }

    #[test]
    fn sync_bookkeeping_survives_reopen() {
        let backend = InMemoryBackend::new();
        {
            let kv = KvStore::open(Box::new(backend.clone()), StoreConfig::default()).unwrap();
            let ledger = LedgerStore::open(kv);
            ledger
                .process_actions(
                    &[account("savings", 100.0, 0), account("food", 0.0, 1)],
                    Origin::Local,
                )
                .unwrap();
            ledger.stash_pushed(1, 1).unwrap();
            assert!(!ledger.rebuild_requested().unwrap());
            ledger.request_rebuild().unwrap();
        }

        let kv = KvStore::open(Box::new(backend), StoreConfig::default()).unwrap();
        let ledger = LedgerStore::open(kv);
        assert!(ledger.rebuild_requested().unwrap());
        assert_eq!(ledger.pushed_actions().unwrap(), vec![account("savings", 100.0, 0)]);
        assert_eq!(ledger.all_local_actions().unwrap(), vec![account("food", 0.0, 1)]);
    }
}
