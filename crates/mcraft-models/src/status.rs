//! Task lifecycle states.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// `created` and `uploaded` belong to the upload flow handled outside the
/// scheduler; the scheduler itself creates records directly in `queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Record exists but no media has been attached yet
    #[default]
    Created,
    /// Source media uploaded, not yet submitted
    Uploaded,
    /// Waiting for a worker slot
    Queued,
    /// A worker is running the engine
    Processing,
    /// Finished successfully; `output_location` is set
    Completed,
    /// Finished with an error; `error_message` is set
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Uploaded => "uploaded",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the scheduler considers this task live (subject to
    /// dispatching, heartbeats and stuck-task detection).
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Processing)
    }

    /// Legal state-machine edges.
    ///
    /// `failed` is reachable from any non-terminal state (validation error,
    /// execution error, timeout); `cancelled` from anything up to and
    /// including `processing`, though cancellation of a processing task is
    /// only best-effort.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Created, Uploaded) | (Created, Queued) => true,
            (Uploaded, Queued) => true,
            (Queued, Processing) => true,
            (Processing, Completed) => true,
            (Created | Uploaded | Queued | Processing, Failed) => true,
            (Created | Uploaded | Queued | Processing, Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(TaskStatus::Created.can_transition_to(TaskStatus::Uploaded));
        assert!(TaskStatus::Uploaded.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_no_transition_leaves_terminal() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            for next in [
                TaskStatus::Created,
                TaskStatus::Uploaded,
                TaskStatus::Queued,
                TaskStatus::Processing,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_failure_and_cancel_edges() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Cancelled));
    }

    #[test]
    fn test_serde_representation() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        let back: TaskStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, TaskStatus::Cancelled);
    }
}
