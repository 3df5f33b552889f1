//! Scheduler metrics collection.
//!
//! Provides standardized metrics for monitoring the task scheduler:
//! - Submission and completion counters by kind and outcome
//! - Timeout counters
//! - Queue depth gauges

use metrics::{counter, gauge};

/// Metric name constants for consistency.
pub mod names {
    /// Total tasks submitted, by kind.
    pub const TASKS_SUBMITTED_TOTAL: &str = "scheduler_tasks_submitted_total";

    /// Total tasks that reached a terminal state, by kind and outcome.
    pub const TASKS_FINISHED_TOTAL: &str = "scheduler_tasks_finished_total";

    /// Total tasks force-failed by the health loop, by prior status.
    pub const TASKS_TIMED_OUT_TOTAL: &str = "scheduler_tasks_timed_out_total";

    /// Current wait-queue depth.
    pub const QUEUE_DEPTH: &str = "scheduler_queue_depth";

    /// Current number of tasks holding a worker slot.
    pub const ACTIVE_TASKS: &str = "scheduler_active_tasks";
}

/// Record a task submission.
pub fn record_submitted(kind: &str) {
    counter!(names::TASKS_SUBMITTED_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Record a task reaching a terminal state.
pub fn record_finished(kind: &str, outcome: &str) {
    counter!(
        names::TASKS_FINISHED_TOTAL,
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a health-loop timeout.
pub fn record_timed_out(prior_status: &str) {
    counter!(
        names::TASKS_TIMED_OUT_TOTAL,
        "prior_status" => prior_status.to_string()
    )
    .increment(1);
}

/// Record current scheduler occupancy.
pub fn record_occupancy(active: usize, waiting: usize) {
    gauge!(names::ACTIVE_TASKS).set(active as f64);
    gauge!(names::QUEUE_DEPTH).set(waiting as f64);
}
