//! Read projections over materialized state.

use super::{from_cbor, LedgerStore};
use crate::entity::{Account, Category, CategoryKind, InitialSavings, Record, Transfer};
use crate::error::CoreResult;
use crate::types::round_money;
use chrono::NaiveDate;

/// Inclusive calendar range. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    /// First day included.
    pub start: Option<NaiveDate>,
    /// Last day included.
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Every date.
    pub fn all() -> Self {
        Self::default()
    }

    /// `[start, end]`.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Returns true if `date` falls inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

/// Which transfers [`LedgerStore::transfers`] returns.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    /// Only transfers touching this account.
    pub account: Option<String>,
    /// Only transfers in this category.
    pub category: Option<String>,
    /// Only transfers dated inside this range.
    pub range: DateRange,
    /// Include soft-deleted transfers.
    pub include_deleted: bool,
}

impl TransferFilter {
    /// Matches every live transfer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one account.
    #[must_use]
    pub fn account(mut self, id: impl Into<String>) -> Self {
        self.account = Some(id.into());
        self
    }

    /// Restricts to one category.
    #[must_use]
    pub fn category(mut self, id: impl Into<String>) -> Self {
        self.category = Some(id.into());
        self
    }

    /// Restricts to a date range.
    #[must_use]
    pub fn range(mut self, range: DateRange) -> Self {
        self.range = range;
        self
    }

    /// Includes soft-deleted transfers.
    #[must_use]
    pub fn include_deleted(mut self, value: bool) -> Self {
        self.include_deleted = value;
        self
    }

    fn matches(&self, transfer: &Transfer) -> bool {
        (self.include_deleted || !transfer.deleted)
            && self.account.as_deref().map_or(true, |id| transfer.touches(id))
            && self
                .category
                .as_deref()
                .map_or(true, |id| transfer.category_id.as_deref() == Some(id))
            && self.range.contains(transfer.date)
    }
}

/// Sum of live transfers in one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTotal {
    /// Category id.
    pub category_id: String,
    /// Category name.
    pub name: String,
    /// Expense or income.
    pub kind: CategoryKind,
    /// Sum of amounts, rounded to cents.
    pub total: f64,
    /// Number of transfers summed.
    pub count: usize,
}

impl LedgerStore {
    fn records<E: Record>(&self) -> CoreResult<Vec<E>> {
        self.kv
            .scan(E::TABLE)
            .into_iter()
            .map(|(_, bytes)| from_cbor(&bytes))
            .collect()
    }

    fn record<E: Record>(&self, id: &str) -> CoreResult<Option<E>> {
        self.kv
            .get(E::TABLE, id)
            .map(|bytes| from_cbor(&bytes))
            .transpose()
    }

    /// All accounts, ordered by id.
    pub fn accounts(&self) -> CoreResult<Vec<Account>> {
        self.records()
    }

    /// One account.
    pub fn account(&self, id: &str) -> CoreResult<Option<Account>> {
        self.record(id)
    }

    /// Transfers matching `filter`, newest date first.
    pub fn transfers(&self, filter: &TransferFilter) -> CoreResult<Vec<Transfer>> {
        let mut transfers: Vec<Transfer> = self
            .records::<Transfer>()?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        transfers.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.modified_at.cmp(&a.modified_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(transfers)
    }

    /// One transfer, deleted or not.
    pub fn transfer(&self, id: &str) -> CoreResult<Option<Transfer>> {
        self.record(id)
    }

    /// Live categories, ordered by id.
    pub fn categories(&self) -> CoreResult<Vec<Category>> {
        Ok(self
            .records::<Category>()?
            .into_iter()
            .filter(|c| !c.deleted)
            .collect())
    }

    /// One category, deleted or not.
    pub fn category(&self, id: &str) -> CoreResult<Option<Category>> {
        self.record(id)
    }

    /// The initial-savings setting, if ever set.
    pub fn initial_savings(&self) -> CoreResult<Option<InitialSavings>> {
        self.record("initialSavings")
    }

    /// `initialBalance + deposits - withdrawals` over live transfers, or
    /// `None` for an unknown account.
    pub fn account_balance(&self, id: &str) -> CoreResult<Option<f64>> {
        let Some(account) = self.account(id)? else {
            return Ok(None);
        };
        let transfers = self.records::<Transfer>()?;
        Ok(Some(round_money(raw_balance(&account, &transfers))))
    }

    /// Initial savings plus the balance of every account.
    pub fn total_balance(&self) -> CoreResult<f64> {
        let transfers = self.records::<Transfer>()?;
        let savings = self.initial_savings()?.map_or(0.0, |s| s.amount);
        let accounts: f64 = self
            .accounts()?
            .iter()
            .map(|account| raw_balance(account, &transfers))
            .sum();
        Ok(round_money(savings + accounts))
    }

    /// Per-category sums of live transfers dated inside `range`, for every
    /// live category.
    pub fn category_totals(&self, range: DateRange) -> CoreResult<Vec<CategoryTotal>> {
        let transfers = self.records::<Transfer>()?;
        let totals = self
            .categories()?
            .into_iter()
            .map(|category| {
                let (total, count) = transfers
                    .iter()
                    .filter(|t| {
                        !t.deleted
                            && range.contains(t.date)
                            && t.category_id.as_deref() == Some(category.id.as_str())
                    })
                    .fold((0.0, 0), |(sum, n), t| (sum + t.amount, n + 1));
                CategoryTotal {
                    category_id: category.id,
                    name: category.name,
                    kind: category.kind,
                    total: round_money(total),
                    count,
                }
            })
            .collect();
        Ok(totals)
    }
}

fn raw_balance(account: &Account, transfers: &[Transfer]) -> f64 {
    account.initial_balance
        + transfers
            .iter()
            .filter(|t| !t.deleted)
            .map(|t| t.delta_for(&account.id))
            .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, Deletion, Origin};
    use chrono::{Duration, TimeZone, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn ledger() -> LedgerStore {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let account = |id: &str, balance| {
            Action::create_account(&Account {
                id: id.into(),
                name: id.into(),
                initial_balance: balance,
                modified_at: t0,
            })
            .unwrap()
        };
        let category = |id: &str, kind| {
            Action::create_category(&Category {
                id: id.into(),
                name: id.into(),
                kind,
                modified_at: t0,
                deleted: false,
            })
            .unwrap()
        };
        let transfer = |id: &str,
                        from: Option<&str>,
                        to: Option<&str>,
                        amount,
                        d,
                        cat: Option<&str>| {
            Action::create_transfer(&Transfer {
                id: id.into(),
                from: from.map(Into::into),
                to: to.map(Into::into),
                amount,
                date: day(d),
                description: String::new(),
                category_id: cat.map(Into::into),
                modified_at: t0 + Duration::minutes(i64::from(d)),
                deleted: false,
            })
            .unwrap()
        };

        let ledger = LedgerStore::open_in_memory().unwrap();
        ledger
            .process_actions(
                &[
                    account("checking", 10.10),
                    account("cash", 0.0),
                    category("food", CategoryKind::Expense),
                    category("salary", CategoryKind::Income),
                    transfer("pay", None, Some("checking"), 1000.0, 1, Some("salary")),
                    transfer("lunch", Some("cash"), None, 12.2, 3, Some("food")),
                    transfer("atm", Some("checking"), Some("cash"), 40.0, 2, None),
                    transfer("dinner", Some("checking"), None, 30.05, 5, Some("food")),
                    Action::delete_transfer(&Deletion {
                        id: "dinner".into(),
                        modified_at: t0 + Duration::hours(1),
                    })
                    .unwrap(),
                    Action::update_initial_savings(&InitialSavings {
                        amount: 500.0,
                        modified_at: t0,
                    })
                    .unwrap(),
                ],
                Origin::Local,
            )
            .unwrap();
        ledger
    }

    #[test]
    fn balances() {
        let ledger = ledger();
        assert_eq!(ledger.account_balance("checking").unwrap(), Some(970.1));
        assert_eq!(ledger.account_balance("cash").unwrap(), Some(27.8));
        assert_eq!(ledger.account_balance("nope").unwrap(), None);
        assert_eq!(ledger.total_balance().unwrap(), 1497.9);
    }

    #[test]
    fn transfers_newest_first() {
        let ledger = ledger();
        let ids: Vec<_> = ledger
            .transfers(&TransferFilter::new())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["lunch", "atm", "pay"]);

        let with_deleted = ledger
            .transfers(&TransferFilter::new().include_deleted(true))
            .unwrap();
        assert_eq!(with_deleted[0].id, "dinner");
    }

    #[test]
    fn transfer_filters() {
        let ledger = ledger();

        let cash = ledger.transfers(&TransferFilter::new().account("cash")).unwrap();
        assert_eq!(cash.len(), 2);

        let food = ledger.transfers(&TransferFilter::new().category("food")).unwrap();
        assert_eq!(food.len(), 1);

        let early = ledger
            .transfers(&TransferFilter::new().range(DateRange::between(day(1), day(2))))
            .unwrap();
        assert_eq!(early.len(), 2);
    }

    #[test]
    fn category_totals_skip_deleted_transfers() {
        let ledger = ledger();
        let totals = ledger.category_totals(DateRange::all()).unwrap();

        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].category_id, "food");
        assert_eq!(totals[0].total, 12.2);
        assert_eq!(totals[0].count, 1);
        assert_eq!(totals[1].total, 1000.0);
    }
}
