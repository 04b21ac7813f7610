//! Engine metrics collection.

use metrics::counter;

use cutroom_models::StepKind;

/// Metric name constants for consistency.
pub mod names {
    /// Step executions started, by step.
    pub const STEPS_EXECUTED: &str = "cutroom_steps_executed_total";

    /// Step executions that failed, by step.
    pub const STEP_FAILURES: &str = "cutroom_step_failures_total";

    /// Task deliveries ignored because the workflow already advanced.
    pub const STALE_DELIVERIES: &str = "cutroom_stale_deliveries_total";

    /// Workflows re-driven by recovery.
    pub const RECOVERY_RETRIES: &str = "cutroom_recovery_retries_total";
}

pub(crate) fn record_step_executed(step: StepKind) {
    counter!(names::STEPS_EXECUTED, "step" => step.as_str()).increment(1);
}

pub(crate) fn record_step_failure(step: StepKind) {
    counter!(names::STEP_FAILURES, "step" => step.as_str()).increment(1);
}

pub(crate) fn record_stale_delivery(step: StepKind) {
    counter!(names::STALE_DELIVERIES, "step" => step.as_str()).increment(1);
}

pub(crate) fn record_recovery_retry() {
    counter!(names::RECOVERY_RETRIES).increment(1);
}
