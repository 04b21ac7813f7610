//! Store metrics collection.

use metrics::counter;

/// Metric name constants for consistency.
pub mod names {
    /// Optimistic-write conflicts observed, by document kind.
    pub const CONFLICTS_TOTAL: &str = "cutroom_store_conflicts_total";

    /// Read-modify-write cycles that exhausted their retry budget.
    pub const EXHAUSTED_TOTAL: &str = "cutroom_store_exhausted_total";
}

/// Record an optimistic-write conflict.
pub fn record_conflict(kind: &'static str) {
    counter!(names::CONFLICTS_TOTAL, "kind" => kind).increment(1);
}

/// Record a retry-budget exhaustion.
pub fn record_exhausted(kind: &'static str) {
    counter!(names::EXHAUSTED_TOTAL, "kind" => kind).increment(1);
}
