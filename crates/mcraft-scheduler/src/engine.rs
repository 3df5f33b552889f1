//! The processing-engine contract and executor registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use mcraft_models::{TaskKind, TaskRecord};

use crate::progress::ProgressReporter;

/// Successful engine result.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// Where the produced file was written
    pub output_location: PathBuf,
}

/// Errors an engine can signal.
///
/// Engines must not retry internally; the scheduler never retries failed
/// tasks, it only persists the terminal state.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Task configuration rejected before any work was done
    #[error("invalid task configuration: {0}")]
    Validation(String),

    /// The engine observed the cancellation signal and stopped
    #[error("task cancelled")]
    Cancelled,

    /// Execution failed
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(anyhow::anyhow!(message.into()))
    }
}

/// What the scheduler hands an engine alongside the task record.
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Progress reporting handle; persisted with a heartbeat refresh
    pub progress: ProgressReporter,
    /// Cancellation signal; flips to `true` at most once. Engines poll it
    /// between units of work (frames, segments, subprocess waits) -- a
    /// started blocking call still runs to its end.
    pub cancel: watch::Receiver<bool>,
}

impl EngineContext {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// A registered processing engine.
///
/// Opaque to the scheduler beyond this contract: potentially slow,
/// potentially failing, reporting progress through the context.
#[async_trait]
pub trait TaskEngine: Send + Sync + 'static {
    async fn process(
        &self,
        task: &TaskRecord,
        ctx: EngineContext,
    ) -> Result<EngineOutput, EngineError>;
}

/// Mapping from task kind to its registered engine.
#[derive(Default)]
pub struct ExecutorRegistry {
    engines: RwLock<HashMap<TaskKind, Arc<dyn TaskEngine>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine for a task kind, replacing any previous one.
    pub fn register(&self, kind: TaskKind, engine: Arc<dyn TaskEngine>) {
        let mut engines = self.engines.write().expect("registry lock poisoned");
        engines.insert(kind, engine);
        tracing::info!(kind = %kind, "Registered task engine");
    }

    /// Look up the engine for a task kind.
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskEngine>> {
        let engines = self.engines.read().expect("registry lock poisoned");
        engines.get(&kind).cloned()
    }

    /// Kinds with a registered engine.
    pub fn registered_kinds(&self) -> Vec<TaskKind> {
        let engines = self.engines.read().expect("registry lock poisoned");
        engines.keys().copied().collect()
    }
}
