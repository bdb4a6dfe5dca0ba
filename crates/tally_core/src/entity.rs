//! Materialized ledger records.
//!
//! Every record is keyed by a caller-supplied stable id and carries the
//! `modifiedAt` of the mutation that produced it. Updates replace the whole
//! record; nothing is merged field by field.

use crate::types::{EntityKind, Timestamp};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record the ledger stores in its own table.
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// The kind reported in rejections and logs.
    const KIND: EntityKind;

    /// Table holding records of this kind.
    const TABLE: &'static str;

    /// Stable id (table key).
    fn id(&self) -> &str;

    /// Timestamp of the mutation that produced this record.
    fn modified_at(&self) -> Timestamp;
}

/// A money account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Balance before any transfer.
    pub initial_balance: f64,
    /// Timestamp of the last accepted mutation.
    pub modified_at: Timestamp,
}

impl Record for Account {
    const KIND: EntityKind = EntityKind::Account;
    const TABLE: &'static str = "accounts";

    fn id(&self) -> &str {
        &self.id
    }

    fn modified_at(&self) -> Timestamp {
        self.modified_at
    }
}

/// Direction of a transfer relative to the ledger's accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Money leaves `from` and goes nowhere tracked.
    Expense,
    /// Money arrives in `to` from nowhere tracked.
    Income,
    /// Money moves from `from` to `to`.
    Transfer,
}

/// An expense, income or transfer between accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    /// Stable id.
    pub id: String,
    /// Account money is withdrawn from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Account money is deposited into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Positive amount moved.
    pub amount: f64,
    /// Calendar date of the transfer (`YYYY-MM-DD`).
    pub date: NaiveDate,
    /// Free-form note.
    #[serde(default)]
    pub description: String,
    /// Optional category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Timestamp of the last accepted mutation.
    pub modified_at: Timestamp,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

impl Transfer {
    /// Classifies the transfer by which ends are set.
    ///
    /// Validation guarantees at least one end; a transfer with neither is
    /// reported as an expense.
    pub fn kind(&self) -> TransferKind {
        match (&self.from, &self.to) {
            (Some(_), Some(_)) => TransferKind::Transfer,
            (None, Some(_)) => TransferKind::Income,
            _ => TransferKind::Expense,
        }
    }

    /// Returns true if either end is `account_id`.
    pub fn touches(&self, account_id: &str) -> bool {
        self.from.as_deref() == Some(account_id) || self.to.as_deref() == Some(account_id)
    }

    /// Effect of this transfer on `account_id`'s balance.
    pub fn delta_for(&self, account_id: &str) -> f64 {
        let mut delta = 0.0;
        if self.to.as_deref() == Some(account_id) {
            delta += self.amount;
        }
        if self.from.as_deref() == Some(account_id) {
            delta -= self.amount;
        }
        delta
    }
}

impl Record for Transfer {
    const KIND: EntityKind = EntityKind::Transfer;
    const TABLE: &'static str = "transfers";

    fn id(&self) -> &str {
        &self.id
    }

    fn modified_at(&self) -> Timestamp {
        self.modified_at
    }
}

/// Whether a category groups spending or earnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    /// Spending category.
    Expense,
    /// Earnings category.
    Income,
}

/// A spending or income category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Expense or income.
    pub kind: CategoryKind,
    /// Timestamp of the last accepted mutation.
    pub modified_at: Timestamp,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

impl Record for Category {
    const KIND: EntityKind = EntityKind::Category;
    const TABLE: &'static str = "categories";

    fn id(&self) -> &str {
        &self.id
    }

    fn modified_at(&self) -> Timestamp {
        self.modified_at
    }
}

/// Savings the user had before tracking started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialSavings {
    /// Amount of savings.
    pub amount: f64,
    /// Timestamp of the last accepted mutation.
    pub modified_at: Timestamp,
}

impl Record for InitialSavings {
    const KIND: EntityKind = EntityKind::InitialSavings;
    const TABLE: &'static str = "settings";

    fn id(&self) -> &str {
        "initialSavings"
    }

    fn modified_at(&self) -> Timestamp {
        self.modified_at
    }
}

/// Payload of a soft delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    /// Id of the record to delete.
    pub id: String,
    /// Timestamp of the delete.
    pub modified_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn transfer(from: Option<&str>, to: Option<&str>) -> Transfer {
        Transfer {
            id: "t1".into(),
            from: from.map(Into::into),
            to: to.map(Into::into),
            amount: 30.0,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: String::new(),
            category_id: None,
            modified_at: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            deleted: false,
        }
    }

    #[test]
    fn transfer_kind_and_delta() {
        let t = transfer(Some("savings"), Some("food"));
        assert_eq!(t.kind(), TransferKind::Transfer);
        assert_eq!(t.delta_for("savings"), -30.0);
        assert_eq!(t.delta_for("food"), 30.0);
        assert_eq!(t.delta_for("rent"), 0.0);

        assert_eq!(transfer(None, Some("food")).kind(), TransferKind::Income);
        assert_eq!(transfer(Some("food"), None).kind(), TransferKind::Expense);
    }

    #[test]
    fn transfer_wire_shape() {
        let json = serde_json::to_value(transfer(Some("savings"), None)).unwrap();
        assert_eq!(json["from"], "savings");
        assert_eq!(json["date"], "2024-03-01");
        assert!(json.get("to").is_none());
        assert!(json.get("categoryId").is_none());
        assert_eq!(json["modifiedAt"], "2024-03-01T09:00:00Z");
    }

    #[test]
    fn category_kind_is_lowercase() {
        let parsed: CategoryKind = serde_json::from_str("\"income\"").unwrap();
        assert_eq!(parsed, CategoryKind::Income);
        assert!(serde_json::from_str::<CategoryKind>("\"savings\"").is_err());
    }
}
