//! Flat-file JSON task store.
//!
//! A single `tasks.json` under the data directory holds every record,
//! keyed by task ID. The whole map is loaded at open and written through
//! on every mutation; writes land in a temp file first and are renamed
//! into place so a crash never leaves a torn file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use mcraft_models::{TaskId, TaskRecord};

use crate::error::StoreResult;
use crate::store::TaskStore;

const TASKS_FILE: &str = "tasks.json";

/// Flat-file JSON store.
pub struct JsonFileStore {
    tasks_path: PathBuf,
    // Serializes all mutations; the map is the write-through cache.
    state: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl JsonFileStore {
    /// Open (or create) the store under the given data directory.
    pub async fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).await?;

        let tasks_path = data_dir.join(TASKS_FILE);
        let tasks = Self::load(&tasks_path).await;

        debug!(
            path = %tasks_path.display(),
            tasks = tasks.len(),
            "Opened task store"
        );

        Ok(Self {
            tasks_path,
            state: Mutex::new(tasks),
        })
    }

    /// Load the task map, degrading to empty on a missing or corrupt file.
    async fn load(path: &Path) -> HashMap<TaskId, TaskRecord> {
        match fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(path = %path.display(), "Failed to parse task file, starting empty: {}", e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), "Failed to read task file, starting empty: {}", e);
                HashMap::new()
            }
        }
    }

    /// Persist the full map: write to `tasks.json.tmp`, then rename.
    async fn persist(&self, tasks: &HashMap<TaskId, TaskRecord>) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(tasks)?;
        let tmp_path = self.tasks_path.with_extension("json.tmp");

        fs::write(&tmp_path, &bytes).await?;
        if let Err(e) = fs::rename(&tmp_path, &self.tasks_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn get(&self, id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        let tasks = self.state.lock().await;
        Ok(tasks.get(id).cloned())
    }

    async fn save(&self, record: &TaskRecord) -> StoreResult<()> {
        let mut tasks = self.state.lock().await;
        tasks.insert(record.id.clone(), record.clone());
        self.persist(&tasks).await
    }

    async fn delete(&self, id: &TaskId) -> StoreResult<bool> {
        let mut tasks = self.state.lock().await;
        let existed = tasks.remove(id).is_some();
        if existed {
            self.persist(&tasks).await?;
        }
        Ok(existed)
    }

    async fn list_by_owner(&self, owner: &str) -> StoreResult<Vec<TaskRecord>> {
        let tasks = self.state.lock().await;
        let mut records: Vec<TaskRecord> =
            tasks.values().filter(|r| r.owner == owner).cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn list_all(&self) -> StoreResult<Vec<TaskRecord>> {
        let tasks = self.state.lock().await;
        Ok(tasks.values().cloned().collect())
    }
}
