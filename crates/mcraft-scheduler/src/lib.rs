//! Task scheduling for the MediaCraft task system.
//!
//! This crate provides:
//! - The `TaskEngine` contract processing engines implement
//! - A bounded scheduler with a FIFO wait queue and typed cancellation
//! - Background dispatch and health loops
//! - Per-task progress reporting persisted to the task store

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use engine::{EngineContext, EngineError, EngineOutput, ExecutorRegistry, TaskEngine};
pub use error::{SchedulerError, SchedulerResult};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use scheduler::{Admission, CancelOutcome, QueueSnapshot, Scheduler};
