//! Per-task progress reporting.
//!
//! Each running task gets a bounded channel; the engine side clamps and
//! `try_send`s (never blocks, drops excess updates), the scheduler side
//! drains into the task store together with a heartbeat refresh. Engines
//! are expected to throttle at the call site (every N frames, per
//! segment) so the write volume stays bounded.

use tokio::sync::mpsc;
use tracing::debug;

/// A single progress update from an engine.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Percent complete, 0-100
    pub percent: u8,
    /// Optional human-readable step description
    pub message: Option<String>,
}

/// Engine-side handle for reporting progress.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    /// Default channel capacity per task.
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Create a reporter and the receiving end the scheduler drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Reporter whose updates go nowhere. Useful in tests and tools.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Report progress with a message. Percent is clamped to 0-100;
    /// the call never blocks and silently drops the update when the
    /// channel is full or the task is being torn down.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        self.send(ProgressUpdate {
            percent: percent.min(100),
            message: Some(message.into()),
        });
    }

    /// Report a bare percentage.
    pub fn report_percent(&self, percent: u8) {
        self.send(ProgressUpdate {
            percent: percent.min(100),
            message: None,
        });
    }

    fn send(&self, update: ProgressUpdate) {
        if let Err(e) = self.tx.try_send(update) {
            debug!("Dropping progress update: {}", e);
        }
    }
}
