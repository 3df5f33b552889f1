//! In-memory task store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use mcraft_models::{TaskId, TaskRecord};

use crate::error::StoreResult;
use crate::store::TaskStore;

/// In-memory store, used by tests and single-process experiments.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.tasks.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get(&self, id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        let tasks = self.tasks.read().expect("store lock poisoned");
        Ok(tasks.get(id).cloned())
    }

    async fn save(&self, record: &TaskRecord) -> StoreResult<()> {
        let mut tasks = self.tasks.write().expect("store lock poisoned");
        tasks.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> StoreResult<bool> {
        let mut tasks = self.tasks.write().expect("store lock poisoned");
        Ok(tasks.remove(id).is_some())
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<TaskRecord>> {
        let tasks = self.tasks.read().expect("store lock poisoned");
        let mut records: Vec<TaskRecord> =
            tasks.values().filter(|r| r.owner == owner).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>> {
        let tasks = self.tasks.read().expect("store lock poisoned");
        Ok(tasks.values().cloned().collect())
    }
}
