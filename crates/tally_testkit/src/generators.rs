//! Property-based test generators using proptest.
//!
//! Ids come from small fixed pools so generated sequences collide often:
//! creates race creates, updates land on existing records, deletes hit
//! both live and deleted ones. Timestamps come from a two-day window for
//! the same reason.

use crate::fixtures::{day, ts};
use proptest::prelude::*;
use tally_core::{
    Account, Action, Category, CategoryKind, Deletion, InitialSavings, Timestamp, Transfer,
};

const ACCOUNT_IDS: &[&str] = &["checking", "savings", "cash"];
const TRANSFER_IDS: &[&str] = &["t1", "t2", "t3", "t4"];
const CATEGORY_IDS: &[&str] = &["food", "rent", "salary"];

fn pick(pool: &'static [&'static str]) -> impl Strategy<Value = String> {
    prop::sample::select(pool).prop_map(String::from)
}

/// Strategy for timestamps within 48 hours of 2024-06-01.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    (0i64..48).prop_map(ts)
}

/// Strategy for monetary amounts with cent precision.
pub fn amount_strategy() -> impl Strategy<Value = f64> {
    (1i64..100_000).prop_map(|cents| cents as f64 / 100.0)
}

/// Strategy for accounts.
pub fn account_strategy() -> impl Strategy<Value = Account> {
    (pick(ACCOUNT_IDS), -50_000i64..500_000, timestamp_strategy()).prop_map(
        |(id, cents, modified_at)| Account {
            name: id.to_uppercase(),
            id,
            initial_balance: cents as f64 / 100.0,
            modified_at,
        },
    )
}

/// Strategy for transfers.
///
/// Some generated transfers fail validation (no endpoint, or the same
/// account twice) or reference records that do not exist yet. Those are
/// rejected when applied, which is part of what the properties exercise.
pub fn transfer_strategy() -> impl Strategy<Value = Transfer> {
    (
        pick(TRANSFER_IDS),
        prop::option::of(pick(ACCOUNT_IDS)),
        prop::option::of(pick(ACCOUNT_IDS)),
        amount_strategy(),
        1u32..=28,
        prop::option::of(pick(CATEGORY_IDS)),
        timestamp_strategy(),
    )
        .prop_map(
            |(id, from, to, amount, date, category_id, modified_at)| Transfer {
                id,
                from,
                to,
                amount,
                date: day(date),
                description: String::new(),
                category_id,
                modified_at,
                deleted: false,
            },
        )
}

/// Strategy for categories.
pub fn category_strategy() -> impl Strategy<Value = Category> {
    (
        pick(CATEGORY_IDS),
        prop_oneof![Just(CategoryKind::Expense), Just(CategoryKind::Income)],
        timestamp_strategy(),
    )
        .prop_map(|(id, kind, modified_at)| Category {
            name: id.to_uppercase(),
            id,
            kind,
            modified_at,
            deleted: false,
        })
}

fn deletion_strategy(pool: &'static [&'static str]) -> impl Strategy<Value = Deletion> {
    (pick(pool), timestamp_strategy()).prop_map(|(id, modified_at)| Deletion { id, modified_at })
}

/// Strategy for a single action of any supported type.
pub fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        account_strategy().prop_map(|a| Action::create_account(&a)),
        account_strategy().prop_map(|a| Action::update_account(&a)),
        transfer_strategy().prop_map(|t| Action::create_transfer(&t)),
        transfer_strategy().prop_map(|t| Action::update_transfer(&t)),
        deletion_strategy(TRANSFER_IDS).prop_map(|d| Action::delete_transfer(&d)),
        category_strategy().prop_map(|c| Action::create_category(&c)),
        category_strategy().prop_map(|c| Action::update_category(&c)),
        deletion_strategy(CATEGORY_IDS).prop_map(|d| Action::delete_category(&d)),
        (amount_strategy(), timestamp_strategy()).prop_map(|(amount, modified_at)| {
            Action::update_initial_savings(&InitialSavings {
                amount,
                modified_at,
            })
        }),
    ]
    .prop_map(|encoded| encoded.expect("generated records always encode"))
}

/// Strategy for action sequences of up to `max_len` actions.
pub fn action_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Action>> {
    prop::collection::vec(action_strategy(), 0..max_len)
}

/// Strategy for batch sizes used to split a sequence.
pub fn batch_sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..6, 1..12)
}

/// Splits `actions` into consecutive batches of the given sizes, cycling
/// through `sizes` until every action is placed.
pub fn split_batches<'a>(actions: &'a [Action], sizes: &[usize]) -> Vec<&'a [Action]> {
    let mut batches = Vec::new();
    let mut rest = actions;
    let mut cycle = sizes.iter().copied().filter(|&size| size > 0).cycle();
    while !rest.is_empty() {
        let size = cycle.next().unwrap_or(rest.len()).min(rest.len());
        let (batch, tail) = rest.split_at(size);
        batches.push(batch);
        rest = tail;
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_generated_actions_decode() {
        let mut runner = TestRunner::default();
        let strategy = action_strategy();

        for _ in 0..100 {
            let action = strategy.new_tree(&mut runner).unwrap().current();
            assert!(action.command().is_ok());
        }
    }

    #[test]
    fn test_split_batches_keeps_order() {
        let actions: Vec<Action> = (0..7)
            .map(|hour| crate::fixtures::savings(hour as f64, hour))
            .collect();
        let batches = split_batches(&actions, &[2, 3]);

        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 3, 2]);
        assert_eq!(batches.concat(), actions);
    }

    #[test]
    fn test_split_batches_ignores_zero_sizes() {
        let actions = vec![crate::fixtures::savings(1.0, 1)];
        assert_eq!(split_batches(&actions, &[0]).len(), 1);
        assert_eq!(split_batches(&[], &[3]).len(), 0);
    }
}
