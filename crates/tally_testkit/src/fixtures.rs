//! Test fixtures and ledger helpers.
//!
//! Provides ledgers with automatic cleanup, builders for the actions tests
//! feed them, and snapshots for comparing two ledgers' materialized state.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tally_core::{
    Account, Action, Category, CategoryKind, Deletion, InitialSavings, KvStore, LedgerStore,
    StoreConfig, Timestamp, Transfer, TransferFilter,
};
use tally_storage::{FileBackend, InMemoryBackend};
use tempfile::TempDir;

enum Backing {
    Memory(InMemoryBackend),
    File(TempDir),
}

/// A test ledger with automatic cleanup.
///
/// Both flavors can be reopened, which replays the ledger's commit log the
/// way a process restart would.
pub struct TestLedger {
    /// The ledger instance.
    pub ledger: LedgerStore,
    backing: Backing,
}

impl TestLedger {
    /// Creates a ledger held in memory.
    pub fn memory() -> Self {
        let backend = InMemoryBackend::new();
        let kv = KvStore::open(Box::new(backend.clone()), StoreConfig::default())
            .expect("Failed to open in-memory store");
        Self {
            ledger: LedgerStore::open(kv),
            backing: Backing::Memory(backend),
        }
    }

    /// Creates a file-backed ledger in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = open_file(&temp_dir.path().join("ledger.log"));
        Self {
            ledger,
            backing: Backing::File(temp_dir),
        }
    }

    /// Returns the ledger log path if file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::File(dir) => Some(dir.path().join("ledger.log")),
            Backing::Memory(_) => None,
        }
    }

    /// Closes the ledger and opens it again from its log.
    pub fn reopen(self) -> Self {
        let Self { ledger, backing } = self;
        drop(ledger);
        let ledger = match &backing {
            Backing::Memory(backend) => {
                let kv = KvStore::open(Box::new(backend.clone()), StoreConfig::default())
                    .expect("Failed to reopen in-memory store");
                LedgerStore::open(kv)
            }
            Backing::File(dir) => open_file(&dir.path().join("ledger.log")),
        };
        Self { ledger, backing }
    }
}

fn open_file(path: &Path) -> LedgerStore {
    let backend = FileBackend::open_with_create_dirs(path).expect("Failed to create ledger log");
    let kv = KvStore::open(Box::new(backend), StoreConfig::default())
        .expect("Failed to open file store");
    LedgerStore::open(kv)
}

impl std::ops::Deref for TestLedger {
    type Target = LedgerStore;

    fn deref(&self) -> &Self::Target {
        &self.ledger
    }
}

/// Runs a test with a temporary in-memory ledger.
///
/// # Example
///
/// ```rust
/// use tally_testkit::with_temp_ledger;
///
/// with_temp_ledger(|ledger| {
///     assert_eq!(ledger.actions_count().unwrap(), 0);
/// });
/// ```
pub fn with_temp_ledger<F, R>(f: F) -> R
where
    F: FnOnce(&LedgerStore) -> R,
{
    let test_ledger = TestLedger::memory();
    f(&test_ledger.ledger)
}

/// `hours` after 2024-06-01T00:00:00Z.
pub fn ts(hours: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0)
        .single()
        .expect("valid base timestamp")
        + Duration::hours(hours)
}

/// A day in June 2024.
pub fn day(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).expect("valid day in June 2024")
}

/// Create-account action. The name is the id in upper case.
pub fn account(id: &str, initial_balance: f64, at: i64) -> Action {
    Action::create_account(&account_record(id, initial_balance, at))
        .expect("Failed to encode account")
}

/// Update-account action.
pub fn update_account(id: &str, initial_balance: f64, at: i64) -> Action {
    Action::update_account(&account_record(id, initial_balance, at))
        .expect("Failed to encode account")
}

fn account_record(id: &str, initial_balance: f64, at: i64) -> Account {
    Account {
        id: id.into(),
        name: id.to_uppercase(),
        initial_balance,
        modified_at: ts(at),
    }
}

/// A transfer between two accounts, dated 2024-06-01.
pub fn transfer(id: &str, from: &str, to: &str, amount: f64, at: i64) -> Transfer {
    Transfer {
        id: id.into(),
        from: Some(from.into()),
        to: Some(to.into()),
        amount,
        date: day(1),
        description: String::new(),
        category_id: None,
        modified_at: ts(at),
        deleted: false,
    }
}

/// Money leaving `from`.
pub fn expense(id: &str, from: &str, amount: f64, at: i64) -> Transfer {
    Transfer {
        to: None,
        ..transfer(id, from, "", amount, at)
    }
}

/// Money arriving in `to`.
pub fn income(id: &str, to: &str, amount: f64, at: i64) -> Transfer {
    Transfer {
        from: None,
        ..transfer(id, "", to, amount, at)
    }
}

/// Create-transfer action.
pub fn create_transfer(transfer: &Transfer) -> Action {
    Action::create_transfer(transfer).expect("Failed to encode transfer")
}

/// Update-transfer action.
pub fn update_transfer(transfer: &Transfer) -> Action {
    Action::update_transfer(transfer).expect("Failed to encode transfer")
}

/// Delete-transfer action.
pub fn delete_transfer(id: &str, at: i64) -> Action {
    Action::delete_transfer(&deletion(id, at)).expect("Failed to encode deletion")
}

/// A live category. The name is the id in upper case.
pub fn category(id: &str, kind: CategoryKind, at: i64) -> Category {
    Category {
        id: id.into(),
        name: id.to_uppercase(),
        kind,
        modified_at: ts(at),
        deleted: false,
    }
}

/// Create-category action.
pub fn create_category(category: &Category) -> Action {
    Action::create_category(category).expect("Failed to encode category")
}

/// Delete-category action.
pub fn delete_category(id: &str, at: i64) -> Action {
    Action::delete_category(&deletion(id, at)).expect("Failed to encode deletion")
}

/// Initial-savings update action.
pub fn savings(amount: f64, at: i64) -> Action {
    Action::update_initial_savings(&InitialSavings {
        amount,
        modified_at: ts(at),
    })
    .expect("Failed to encode initial savings")
}

fn deletion(id: &str, at: i64) -> Deletion {
    Deletion {
        id: id.into(),
        modified_at: ts(at),
    }
}

/// Everything a ledger has materialized, for comparing two ledgers.
///
/// Counters, the local queue and deleted records are left out: two devices
/// that converged hold the same live records but got there through
/// different batches, and a soft delete keeps whatever fields the deleting
/// device had.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    /// All accounts.
    pub accounts: Vec<Account>,
    /// Live transfers.
    pub transfers: Vec<Transfer>,
    /// Live categories.
    pub categories: Vec<Category>,
    /// The initial-savings setting.
    pub initial_savings: Option<InitialSavings>,
    /// Initial savings plus every account's balance.
    pub total_balance: f64,
}

impl LedgerSnapshot {
    /// Reads the snapshot from `ledger`.
    pub fn capture(ledger: &LedgerStore) -> Self {
        Self {
            accounts: ledger.accounts().expect("Failed to read accounts"),
            transfers: ledger
                .transfers(&TransferFilter::new())
                .expect("Failed to read transfers"),
            categories: ledger.categories().expect("Failed to read categories"),
            initial_savings: ledger
                .initial_savings()
                .expect("Failed to read initial savings"),
            total_balance: ledger.total_balance().expect("Failed to read balance"),
        }
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use tally_core::Origin;

    /// Two accounts, a category, an expense against it and a transfer
    /// between the accounts, applied as local actions.
    ///
    /// Balances afterwards: `checking` 880, `savings` 550.
    pub fn household() -> TestLedger {
        let test_ledger = TestLedger::memory();
        let groceries = category("groceries", CategoryKind::Expense, 0);
        let mut shopping = expense("shopping", "checking", 70.0, 2);
        shopping.category_id = Some("groceries".into());

        test_ledger
            .process_actions(
                &[
                    account("checking", 1000.0, 0),
                    account("savings", 500.0, 0),
                    create_category(&groceries),
                    create_transfer(&shopping),
                    create_transfer(&transfer("monthly", "checking", "savings", 50.0, 3)),
                ],
                Origin::Local,
            )
            .expect("Failed to seed ledger");
        test_ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::Origin;

    #[test]
    fn test_household_scenario() {
        let ledger = scenarios::household();
        assert_eq!(ledger.account_balance("checking").unwrap(), Some(880.0));
        assert_eq!(ledger.account_balance("savings").unwrap(), Some(550.0));
        assert_eq!(ledger.local_actions_count(), 5);
    }

    #[test]
    fn test_reopen_memory_ledger() {
        let ledger = scenarios::household();
        let before = LedgerSnapshot::capture(&ledger);

        let ledger = ledger.reopen();
        assert_eq!(LedgerSnapshot::capture(&ledger), before);
        assert_eq!(ledger.actions_count().unwrap(), 5);
    }

    #[test]
    fn test_reopen_file_ledger() {
        let ledger = TestLedger::file();
        assert!(ledger.path().is_some());
        ledger
            .process_actions(&[savings(1200.0, 1)], Origin::Local)
            .unwrap();

        let ledger = ledger.reopen();
        assert_eq!(ledger.initial_savings().unwrap().unwrap().amount, 1200.0);
    }

    #[test]
    fn test_with_temp_ledger() {
        let balance = with_temp_ledger(|ledger| {
            ledger
                .process_actions(&[account("a", 10.0, 0)], Origin::Remote)
                .unwrap();
            ledger.total_balance().unwrap()
        });
        assert_eq!(balance, 10.0);
    }
}
