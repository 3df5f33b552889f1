//! Scheduler error types.

use thiserror::Error;

use mcraft_models::TaskId;
use mcraft_store::StoreError;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
