//! Scheduler configuration.

use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks processing at once (worker pool size)
    pub max_concurrent: usize,
    /// Advisory cap on the wait queue, used by `can_accept`
    pub max_queue_size: usize,
    /// How often the dispatch loop promotes queued tasks into free slots
    pub dispatch_interval: Duration,
    /// How often the health loop scans for stuck tasks
    pub health_interval: Duration,
    /// Maximum age of a task still waiting in the queue
    pub queued_timeout: Duration,
    /// Maximum age of a task still processing
    pub processing_timeout: Duration,
    /// How long graceful shutdown waits for in-flight tasks
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_queue_size: 50,
            dispatch_interval: Duration::from_secs(1),
            health_interval: Duration::from_secs(30),
            queued_timeout: Duration::from_secs(15 * 60),
            processing_timeout: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent: std::env::var("MCRAFT_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            max_queue_size: std::env::var("MCRAFT_MAX_QUEUE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50),
            dispatch_interval: Duration::from_secs(
                std::env::var("MCRAFT_DISPATCH_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1),
            ),
            health_interval: Duration::from_secs(
                std::env::var("MCRAFT_HEALTH_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            queued_timeout: Duration::from_secs(
                std::env::var("MCRAFT_QUEUED_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15 * 60),
            ),
            processing_timeout: Duration::from_secs(
                std::env::var("MCRAFT_PROCESSING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30 * 60),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("MCRAFT_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }
}
