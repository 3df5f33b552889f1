//! Task records: the unit of work and its persisted state.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TaskConfig;
use crate::status::TaskStatus;

/// Unique identifier for a task, assigned at submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type of task; selects the processing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    WatermarkRemoval,
    VideoMerge,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::WatermarkRemoval => "watermark_removal",
            TaskKind::VideoMerge => "video_merge",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted task record.
///
/// The task store is the source of truth for everything here; the
/// scheduler's in-memory structures only track who currently holds a
/// worker slot.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskRecord {
    /// Unique task ID, immutable
    pub id: TaskId,

    /// Identifier of the submitting principal; the scheduler never
    /// interprets it, it exists for ownership checks in the API layer
    pub owner: String,

    /// Task type, immutable after creation
    pub kind: TaskKind,

    /// Lifecycle state
    #[serde(default)]
    pub status: TaskStatus,

    /// Type-specific parameters
    pub config: TaskConfig,

    /// Progress (0-100), written only by the running worker
    #[serde(default)]
    pub progress_percent: u8,

    /// Human-readable progress description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set on the queued -> processing transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on entry into a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Liveness timestamp refreshed by the health loop while processing,
    /// independent of engine-reported progress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Set only on transition into `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Set only on transition into `completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_location: Option<PathBuf>,
}

impl TaskRecord {
    /// Create a record ready for submission; the kind is derived from the
    /// config so the two can never disagree.
    pub fn new(owner: impl Into<String>, config: TaskConfig) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            owner: owner.into(),
            kind: config.kind(),
            status: TaskStatus::Queued,
            config,
            progress_percent: 0,
            progress_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat: Some(now),
            error_message: None,
            output_location: None,
        }
    }

    /// Whether the record is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the record as picked up by a worker.
    pub fn start(&mut self) {
        self.status = TaskStatus::Processing;
        let now = Utc::now();
        self.started_at = Some(now);
        self.last_heartbeat = Some(now);
    }

    /// Mark the record as completed with its output location.
    pub fn complete(&mut self, output_location: impl Into<PathBuf>) {
        self.status = TaskStatus::Completed;
        self.progress_percent = 100;
        self.output_location = Some(output_location.into());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the record as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the record as cancelled.
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Refresh the liveness timestamp.
    pub fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }

    /// Update progress, clamping to 0-100.
    pub fn set_progress(&mut self, percent: u8, message: Option<String>) {
        self.progress_percent = percent.min(100);
        if message.is_some() {
            self.progress_message = message;
        }
    }

    /// Seconds since the record was created.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Whether the worker looks gone: no heartbeat within
    /// `stale_threshold_secs`, with `grace_period_secs` allowed after
    /// start for records that never heartbeated.
    pub fn is_stale(&self, stale_threshold_secs: i64, grace_period_secs: i64) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        match self.last_heartbeat {
            Some(hb) => (now - hb).num_seconds() > stale_threshold_secs,
            None => (now - self.created_at).num_seconds() > grace_period_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MergeInput, VideoMergeConfig, WatermarkRemovalConfig};
    use crate::region::Region;

    fn watermark_record() -> TaskRecord {
        TaskRecord::new(
            "session-1",
            TaskConfig::WatermarkRemoval(WatermarkRemovalConfig {
                input: "/data/uploads/a.mp4".into(),
                regions: vec![Region::new(10, 10, 100, 40)],
            }),
        )
    }

    #[test]
    fn test_record_creation() {
        let record = watermark_record();
        assert_eq!(record.status, TaskStatus::Queued);
        assert_eq!(record.kind, TaskKind::WatermarkRemoval);
        assert_eq!(record.progress_percent, 0);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut record = watermark_record();

        record.start();
        assert_eq!(record.status, TaskStatus::Processing);
        assert!(record.started_at.is_some());

        record.complete("/data/results/session-1/a_watermark_removed.mp4");
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress_percent, 100);
        assert!(record.completed_at.is_some());
        assert!(record.output_location.is_some());
    }

    #[test]
    fn test_failure_records_message() {
        let mut record = watermark_record();
        record.start();
        record.fail("Cannot open video file");
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("Cannot open video file"));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_progress_clamped() {
        let mut record = watermark_record();
        record.set_progress(150, Some("almost there".into()));
        assert_eq!(record.progress_percent, 100);
        assert_eq!(record.progress_message.as_deref(), Some("almost there"));
    }

    #[test]
    fn test_stale_detection() {
        let mut record = watermark_record();
        record.start();
        assert!(!record.is_stale(60, 120));

        record.last_heartbeat = Some(Utc::now() - chrono::Duration::seconds(200));
        assert!(record.is_stale(60, 120));

        record.touch_heartbeat();
        assert!(!record.is_stale(60, 120));
    }

    #[test]
    fn test_serde_round_trip() {
        let record = TaskRecord::new(
            "session-2",
            TaskConfig::VideoMerge(VideoMergeConfig {
                inputs: vec![
                    MergeInput::trimmed("/data/uploads/a.mp4", 0.0, 5.0),
                    MergeInput::full("/data/uploads/b.mp4"),
                ],
            }),
        );

        let json = serde_json::to_string(&record).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, record.id);
        assert_eq!(back.owner, record.owner);
        assert_eq!(back.kind, record.kind);
        assert_eq!(back.status, record.status);
        assert_eq!(back.config, record.config);
        assert_eq!(back.created_at, record.created_at);
        assert_eq!(back.last_heartbeat, record.last_heartbeat);
    }
}
