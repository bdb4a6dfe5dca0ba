//! Property tests for applying action sequences.

use proptest::prelude::*;
use tally_core::{Action, ActionOutcome, LedgerStore, Origin};
use tally_testkit::prelude::*;

fn replay(actions: &[Action], sizes: &[usize], origin: Origin) -> TestLedger {
    let ledger = TestLedger::memory();
    for batch in split_batches(actions, sizes) {
        ledger.process_actions(batch, origin).unwrap();
    }
    ledger
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// How a sequence is cut into batches never changes the result.
    #[test]
    fn batching_does_not_change_state(
        actions in action_sequence_strategy(40),
        sizes in batch_sizes_strategy(),
    ) {
        let whole = replay(&actions, &[actions.len().max(1)], Origin::Remote);
        let batched = replay(&actions, &sizes, Origin::Remote);

        prop_assert_eq!(LedgerSnapshot::capture(&whole), LedgerSnapshot::capture(&batched));
        prop_assert_eq!(whole.actions_count().unwrap(), batched.actions_count().unwrap());
    }

    /// Local and remote application materialize the same records; only the
    /// queue differs.
    #[test]
    fn origin_only_affects_the_queue(actions in action_sequence_strategy(30)) {
        let local = replay(&actions, &[5], Origin::Local);
        let remote = replay(&actions, &[5], Origin::Remote);

        prop_assert_eq!(LedgerSnapshot::capture(&local), LedgerSnapshot::capture(&remote));
        prop_assert_eq!(local.local_actions_count(), local.actions_count().unwrap());
        prop_assert_eq!(remote.local_actions_count(), 0);
    }

    /// A rejected action leaves every record and counter untouched.
    #[test]
    fn rejections_change_nothing(actions in action_sequence_strategy(30)) {
        let ledger = LedgerStore::open_in_memory().unwrap();
        for action in &actions {
            let before = LedgerSnapshot::capture(&ledger);
            let count = ledger.actions_count().unwrap();

            let report = ledger
                .process_actions(std::slice::from_ref(action), Origin::Local)
                .unwrap();
            if let [ActionOutcome::Rejected(_)] = report.outcomes.as_slice() {
                prop_assert_eq!(LedgerSnapshot::capture(&ledger), before);
                prop_assert_eq!(ledger.actions_count().unwrap(), count);
            } else {
                prop_assert_eq!(ledger.actions_count().unwrap(), count + 1);
                let last = ledger.last_action().unwrap();
                prop_assert_eq!(last.as_ref(), Some(action));
            }
        }
    }

    /// Applied actions are counted exactly once, and survive a reopen.
    #[test]
    fn counters_survive_reopen(actions in action_sequence_strategy(25)) {
        let ledger = TestLedger::memory();
        let report = ledger.process_actions(&actions, Origin::Local).unwrap();
        prop_assert_eq!(ledger.actions_count().unwrap(), report.applied() as u64);
        prop_assert_eq!(report.applied() + report.rejected(), actions.len());

        let before = LedgerSnapshot::capture(&ledger);
        let queued = ledger.all_local_actions().unwrap();

        let ledger = ledger.reopen();
        prop_assert_eq!(LedgerSnapshot::capture(&ledger), before);
        prop_assert_eq!(ledger.all_local_actions().unwrap(), queued);
    }
}
