//! Small shared types.

use chrono::{DateTime, Utc};
use std::fmt;

/// Wall-clock timestamp carried by every mutation (`modifiedAt`).
pub type Timestamp = DateTime<Utc>;

/// The kinds of materialized records the ledger keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A money account.
    Account,
    /// An expense, income or transfer between accounts.
    Transfer,
    /// A spending or income category.
    Category,
    /// The scalar initial-savings setting.
    InitialSavings,
}

impl EntityKind {
    /// Returns the lowercase name used in logs and messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Transfer => "transfer",
            Self::Category => "category",
            Self::InitialSavings => "initial savings",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rounds a monetary value to cents.
///
/// Only applied to values leaving the store; stored amounts keep full
/// precision.
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Formats a 1-based position as a key that sorts in numeric order.
pub fn position_key(position: u64) -> String {
    format!("{position:020}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_cents() {
        assert_eq!(round_money(0.1 + 0.2), 0.3);
        assert_eq!(round_money(70.0), 70.0);
        assert_eq!(round_money(-12.345_6), -12.35);
    }

    #[test]
    fn position_keys_sort_numerically() {
        assert!(position_key(9) < position_key(10));
        assert_eq!(position_key(1).len(), 20);
    }
}
