//! Store metrics
//!
//! Counters are recorded through the `metrics` facade. Nothing is exported
//! unless the embedding application installs a recorder.

use metrics::{counter, describe_counter};

pub const ENTRIES_CREATED: &str = "confstore.entries.created";
pub const ENTRIES_UPDATED: &str = "confstore.entries.updated";
pub const ENTRIES_DELETED: &str = "confstore.entries.deleted";
pub const TRANSACTIONS_COMMITTED: &str = "confstore.transactions.committed";
pub const TRANSACTIONS_ROLLED_BACK: &str = "confstore.transactions.rolled_back";
pub const CONSISTENCY_CHECKS: &str = "confstore.consistency.checks";
pub const CONSISTENCY_FAILURES: &str = "confstore.consistency.failures";
pub const REPAIR_MOVED: &str = "confstore.repair.moved";

/// Register descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(ENTRIES_CREATED, "Entries inserted, including implicit intermediates");
    describe_counter!(ENTRIES_UPDATED, "Entry values overwritten");
    describe_counter!(ENTRIES_DELETED, "Entries removed, including subtree members");
    describe_counter!(TRANSACTIONS_COMMITTED, "Outermost transactions committed");
    describe_counter!(TRANSACTIONS_ROLLED_BACK, "Scopes dropped without commit");
    describe_counter!(CONSISTENCY_CHECKS, "Consistency checks run");
    describe_counter!(CONSISTENCY_FAILURES, "Consistency checks that found a problem");
    describe_counter!(REPAIR_MOVED, "Entries renamed or re-attached by repair");
}

pub(crate) fn entries_created(count: u64) {
    counter!(ENTRIES_CREATED).increment(count);
}

pub(crate) fn entries_updated() {
    counter!(ENTRIES_UPDATED).increment(1);
}

pub(crate) fn entries_deleted(count: u64) {
    counter!(ENTRIES_DELETED).increment(count);
}

pub(crate) fn transaction_committed() {
    counter!(TRANSACTIONS_COMMITTED).increment(1);
}

pub(crate) fn transaction_rolled_back() {
    counter!(TRANSACTIONS_ROLLED_BACK).increment(1);
}

pub(crate) fn consistency_check() {
    counter!(CONSISTENCY_CHECKS).increment(1);
}

pub(crate) fn consistency_failure() {
    counter!(CONSISTENCY_FAILURES).increment(1);
}

pub(crate) fn repair_moved(count: u64) {
    counter!(REPAIR_MOVED).increment(count);
}
