//! The task store contract.

use async_trait::async_trait;

use mcraft_models::{TaskId, TaskRecord, TaskStatus};

use crate::error::StoreResult;

/// Durable key-value map from task ID to task record.
///
/// Implementations must provide read-after-write consistency for a single
/// key; no cross-key transactions are assumed. All writers perform
/// read-modify-write and last-writer-wins is acceptable: a `processing`
/// task has a single owning worker, so conflicting writes to the same
/// record are rare by construction.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a record by ID.
    async fn get(&self, id: &TaskId) -> StoreResult<Option<TaskRecord>>;

    /// Idempotent upsert.
    async fn save(&self, record: &TaskRecord) -> StoreResult<()>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, id: &TaskId) -> StoreResult<bool>;

    /// All records belonging to an owner, newest first.
    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<TaskRecord>>;

    /// Every record in the store.
    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>>;

    /// Records currently in the given status.
    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        let all = self.list_all().await?;
        Ok(all.into_iter().filter(|r| r.status == status).collect())
    }
}
