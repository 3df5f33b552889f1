//! The task scheduler: admission, queueing, dispatch, health checks and
//! cancellation.
//!
//! A single mutex guards the in-memory structures (active-task map and
//! FIFO wait queue); the task store remains the source of truth for task
//! content and status. Two background loops run alongside the workers: a
//! dispatch loop that promotes queued tasks into free slots, and a health
//! loop that force-fails stuck tasks and refreshes heartbeats.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mcraft_models::{TaskConfig, TaskId, TaskRecord, TaskStatus};
use mcraft_store::TaskStore;

use crate::config::SchedulerConfig;
use crate::engine::{EngineContext, EngineError, ExecutorRegistry, TaskEngine};
use crate::error::{SchedulerError, SchedulerResult};
use crate::metrics;
use crate::progress::{ProgressReporter, ProgressUpdate};

/// Result of a cancellation attempt.
///
/// Cancellation of a queued task is certain; cancellation of a processing
/// task only signals the worker and is not guaranteed once the engine has
/// started a blocking unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Removed before it ever started; the task is now `cancelled`
    Queued,
    /// The running worker was asked to stop; the task reports `cancelled`
    /// only if the engine actually observes the interrupt
    RequestedInterrupt,
    /// The task had already completed, failed or been cancelled
    AlreadyTerminal,
}

/// Advisory admission-check result consumed by the API layer.
#[derive(Debug, Clone)]
pub struct Admission {
    pub accepted: bool,
    pub message: String,
}

/// Point-in-time view of scheduler occupancy.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub active: usize,
    pub waiting: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

/// A task currently holding a worker slot.
struct ActiveTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// In-memory scheduler state, all behind one lock.
///
/// Invariant: a live task is in exactly one of these structures --
/// `waiting` while its persisted status is `queued` (unless started
/// immediately), `active` while `processing`.
#[derive(Default)]
struct SchedState {
    active: HashMap<TaskId, ActiveTask>,
    waiting: VecDeque<TaskId>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    registry: ExecutorRegistry,
    state: Mutex<SchedState>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

/// The scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler over the given store. Background loops are not
    /// running until `start` is called; submissions still execute
    /// immediately when a slot is free.
    pub fn new(config: SchedulerConfig, store: Arc<dyn TaskStore>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                store,
                registry: ExecutorRegistry::new(),
                state: Mutex::new(SchedState::default()),
                shutdown,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Register a processing engine for a task kind.
    pub fn register_engine(&self, kind: mcraft_models::TaskKind, engine: Arc<dyn TaskEngine>) {
        self.inner.registry.register(kind, engine);
    }

    /// Spawn the dispatch and health loops.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already started");
            return;
        }

        info!(
            max_concurrent = self.inner.config.max_concurrent,
            max_queue_size = self.inner.config.max_queue_size,
            "Starting scheduler"
        );

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.dispatch_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Dispatch loop stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = Self::dispatch_pass(&inner).await {
                            error!("Error in dispatch loop: {}", e);
                        }
                    }
                }
            }
        });

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.health_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Health loop stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = Self::health_pass(&inner).await {
                            error!("Error in health check: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Submit a task. Persists the record as `queued`, then either starts
    /// it immediately (free slot) or appends it to the wait queue.
    ///
    /// Never blocks on queue depth; `can_accept` is the advisory
    /// backpressure check and is deliberately not enforced here.
    pub async fn submit(
        &self,
        owner: impl Into<String>,
        config: TaskConfig,
    ) -> SchedulerResult<TaskId> {
        let record = TaskRecord::new(owner, config);
        let id = record.id.clone();
        let kind = record.kind;

        self.inner.store.save(&record).await?;

        let mut state = self.inner.state.lock().await;
        if state.active.len() < self.inner.config.max_concurrent {
            Self::start_task_locked(&self.inner, &mut state, id.clone());
            info!(task_id = %id, kind = %kind, active = state.active.len(), "Task started immediately");
        } else {
            state.waiting.push_back(id.clone());
            info!(task_id = %id, kind = %kind, queue = state.waiting.len(), "Task queued");
        }
        metrics::record_occupancy(state.active.len(), state.waiting.len());
        drop(state);

        metrics::record_submitted(kind.as_str());
        Ok(id)
    }

    /// Advisory admission check; compares the wait-queue length against
    /// the configured maximum.
    pub async fn can_accept(&self) -> Admission {
        let state = self.inner.state.lock().await;
        let waiting = state.waiting.len();
        let active = state.active.len();
        drop(state);

        if waiting >= self.inner.config.max_queue_size {
            return Admission {
                accepted: false,
                message: format!(
                    "The queue is full ({}/{}), please try again later",
                    waiting, self.inner.config.max_queue_size
                ),
            };
        }

        if active >= self.inner.config.max_concurrent {
            // Rough estimate assuming one minute per queued task
            let estimated_wait_min = waiting + 1;
            return Admission {
                accepted: true,
                message: format!(
                    "All workers are busy; the task will be queued (estimated wait: {} min)",
                    estimated_wait_min
                ),
            };
        }

        Admission {
            accepted: true,
            message: "Task will start processing immediately".to_string(),
        }
    }

    /// Attempt to cancel a task. See `CancelOutcome` for the guarantees.
    pub async fn cancel(&self, id: &TaskId) -> SchedulerResult<CancelOutcome> {
        let record = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;

        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        let mut state = self.inner.state.lock().await;

        if let Some(active) = state.active.get(id) {
            let _ = active.cancel.send(true);
            info!(task_id = %id, "Requested interrupt of processing task");
            return Ok(CancelOutcome::RequestedInterrupt);
        }

        // Not holding a slot: removal is certain. Re-read under the lock
        // so a task that finished in the meantime is not clobbered.
        state.waiting.retain(|queued| queued != id);
        let mut record = self
            .inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))?;
        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        record.cancel();
        self.inner.store.save(&record).await?;
        metrics::record_occupancy(state.active.len(), state.waiting.len());
        drop(state);

        info!(task_id = %id, "Cancelled queued task");
        metrics::record_finished(record.kind.as_str(), "cancelled");
        Ok(CancelOutcome::Queued)
    }

    /// Passthrough read from the task store.
    pub async fn status_of(&self, id: &TaskId) -> SchedulerResult<TaskRecord> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.clone()))
    }

    /// All tasks belonging to an owner, newest first.
    pub async fn tasks_for(&self, owner: &str) -> SchedulerResult<Vec<TaskRecord>> {
        Ok(self.inner.store.list_by_owner(owner).await?)
    }

    /// Current occupancy.
    pub async fn queue_status(&self) -> QueueSnapshot {
        let state = self.inner.state.lock().await;
        QueueSnapshot {
            active: state.active.len(),
            waiting: state.waiting.len(),
            max_concurrent: self.inner.config.max_concurrent,
            max_queue_size: self.inner.config.max_queue_size,
        }
    }

    /// Run one dispatch pass. Exposed for tests; the dispatch loop calls
    /// this every tick. Returns the number of tasks started.
    pub async fn dispatch_once(&self) -> SchedulerResult<usize> {
        Self::dispatch_pass(&self.inner).await
    }

    /// Run one health pass. Exposed for tests; the health loop calls this
    /// every tick. Returns (tasks force-failed, heartbeats refreshed).
    pub async fn check_health_once(&self) -> SchedulerResult<(u32, u32)> {
        Self::health_pass(&self.inner).await
    }

    /// Signal shutdown and wait for in-flight tasks up to the configured
    /// timeout. Tasks still running after that keep their worker until
    /// the process exits.
    pub async fn shutdown(&self) {
        info!("Shutting down scheduler");
        let _ = self.inner.shutdown.send(true);

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout;
        loop {
            let active = self.inner.state.lock().await.active.len();
            if active == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "Shutdown timeout reached with tasks still in flight");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        info!("Scheduler shutdown complete");
    }

    /// Promote queued tasks into free slots. The only writer for the
    /// queued -> processing transition.
    async fn dispatch_pass(inner: &Arc<SchedulerInner>) -> SchedulerResult<usize> {
        let mut started = 0;
        let mut state = inner.state.lock().await;

        while state.active.len() < inner.config.max_concurrent {
            let Some(id) = state.waiting.pop_front() else {
                break;
            };

            // The record may have been cancelled or force-failed while it
            // waited; re-verify before starting.
            match inner.store.get(&id).await? {
                Some(record) if record.status == TaskStatus::Queued => {
                    Self::start_task_locked(inner, &mut state, id.clone());
                    debug!(task_id = %id, "Dispatched queued task");
                    started += 1;
                }
                Some(record) => {
                    warn!(task_id = %id, status = %record.status, "Skipping task no longer queued");
                }
                None => {
                    warn!(task_id = %id, "Skipping task missing from store");
                }
            }
        }

        metrics::record_occupancy(state.active.len(), state.waiting.len());
        Ok(started)
    }

    /// Force-fail stuck tasks and refresh heartbeats for live ones.
    async fn health_pass(inner: &Arc<SchedulerInner>) -> SchedulerResult<(u32, u32)> {
        let now = Utc::now();
        let mut timed_out = 0u32;

        for record in inner.store.list_all().await? {
            if !record.status.is_active() {
                continue;
            }

            let timeout = match record.status {
                TaskStatus::Queued => inner.config.queued_timeout,
                _ => inner.config.processing_timeout,
            };
            let elapsed_secs = record.age_seconds(now);
            if elapsed_secs <= timeout.as_secs() as i64 {
                continue;
            }

            let elapsed_min = elapsed_secs as f64 / 60.0;
            warn!(
                task_id = %record.id,
                status = %record.status,
                "Task stuck for {:.1} minutes, forcing failure",
                elapsed_min
            );

            let prior_status = record.status;
            let mut record = record;
            record.fail(format!("Task timeout after {:.1} minutes", elapsed_min));
            inner.store.save(&record).await?;

            // Drop it from the scheduler structures and best-effort
            // interrupt the worker if it holds a slot.
            let mut state = inner.state.lock().await;
            state.waiting.retain(|id| id != &record.id);
            if let Some(active) = state.active.remove(&record.id) {
                let _ = active.cancel.send(true);
                active.handle.abort();
            }
            metrics::record_occupancy(state.active.len(), state.waiting.len());
            drop(state);

            metrics::record_timed_out(prior_status.as_str());
            metrics::record_finished(record.kind.as_str(), "timed_out");
            timed_out += 1;
        }

        // Refresh heartbeats for everything still holding a slot,
        // independent of engine-reported progress.
        let active_ids: Vec<TaskId> = {
            let state = inner.state.lock().await;
            state.active.keys().cloned().collect()
        };

        let mut refreshed = 0u32;
        for id in active_ids {
            if let Some(mut record) = inner.store.get(&id).await? {
                if record.status == TaskStatus::Processing {
                    record.touch_heartbeat();
                    inner.store.save(&record).await?;
                    refreshed += 1;
                }
            }
        }

        Ok((timed_out, refreshed))
    }

    /// Spawn a worker for the task. Caller holds the state lock.
    fn start_task_locked(inner: &Arc<SchedulerInner>, state: &mut SchedState, id: TaskId) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let worker_inner = Arc::clone(inner);
        let worker_id = id.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = Self::run_task(&worker_inner, &worker_id, cancel_rx).await {
                error!(task_id = %worker_id, "Worker error: {}", e);
            }
            let mut state = worker_inner.state.lock().await;
            state.active.remove(&worker_id);
            metrics::record_occupancy(state.active.len(), state.waiting.len());
        });

        state.active.insert(
            id,
            ActiveTask {
                cancel: cancel_tx,
                handle,
            },
        );
    }

    /// Worker body: transition to processing, run the engine, persist the
    /// terminal state. Engine failures never propagate out of here.
    async fn run_task(
        inner: &Arc<SchedulerInner>,
        id: &TaskId,
        cancel_rx: watch::Receiver<bool>,
    ) -> SchedulerResult<()> {
        let Some(mut record) = inner.store.get(id).await? else {
            warn!(task_id = %id, "Task missing from store at start");
            return Ok(());
        };

        if record.status != TaskStatus::Queued {
            warn!(task_id = %id, status = %record.status, "Refusing to start task not in queued state");
            return Ok(());
        }

        record.start();
        inner.store.save(&record).await?;
        info!(task_id = %id, kind = %record.kind, "Task processing");

        let Some(engine) = inner.registry.get(record.kind) else {
            record.fail(format!("No executor registered for task type: {}", record.kind));
            inner.store.save(&record).await?;
            metrics::record_finished(record.kind.as_str(), "failed");
            return Ok(());
        };

        // Validate before execution, not before admission.
        if let Err(e) = record.config.validate() {
            record.fail(e.to_string());
            inner.store.save(&record).await?;
            info!(task_id = %id, "Task failed validation: {}", e);
            metrics::record_finished(record.kind.as_str(), "failed");
            return Ok(());
        }

        let (reporter, mut progress_rx) = ProgressReporter::channel(ProgressReporter::DEFAULT_CAPACITY);
        let ctx = EngineContext {
            progress: reporter,
            cancel: cancel_rx,
        };

        // Drain progress updates into the store until the engine drops
        // its reporter.
        let drain_store = Arc::clone(&inner.store);
        let drain_id = id.clone();
        let drain = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                if let Err(e) = persist_progress(drain_store.as_ref(), &drain_id, update).await {
                    warn!(task_id = %drain_id, "Failed to persist progress: {}", e);
                }
            }
        });

        // Run the engine in its own task: a panicking engine surfaces as
        // a JoinError and fails the task, not the pool.
        let engine_record = record.clone();
        let engine_task =
            tokio::spawn(async move { engine.process(&engine_record, ctx).await });

        let engine_result = match engine_task.await {
            Ok(result) => result,
            Err(join_err) => Err(EngineError::Failed(anyhow::anyhow!(
                "engine crashed: {join_err}"
            ))),
        };

        let _ = drain.await;

        // Reload so progress fields written by the drain task survive.
        let mut record = inner.store.get(id).await?.unwrap_or(record);
        let outcome = match engine_result {
            Ok(output) => {
                record.complete(&output.output_location);
                info!(
                    task_id = %id,
                    output = %output.output_location.display(),
                    "Task completed"
                );
                "completed"
            }
            Err(EngineError::Cancelled) => {
                record.cancel();
                info!(task_id = %id, "Task cancelled during processing");
                "cancelled"
            }
            Err(EngineError::Validation(message)) => {
                info!(task_id = %id, "Task failed validation: {}", message);
                record.fail(message);
                "failed"
            }
            Err(EngineError::Failed(e)) => {
                error!(task_id = %id, "Task failed: {:#}", e);
                record.fail(format!("{e:#}"));
                "failed"
            }
        };
        inner.store.save(&record).await?;
        metrics::record_finished(record.kind.as_str(), outcome);

        Ok(())
    }
}

/// Persist one progress update plus a heartbeat refresh. Skips records
/// that already reached a terminal state (e.g. force-failed by the health
/// loop while the engine was still reporting).
async fn persist_progress(
    store: &dyn TaskStore,
    id: &TaskId,
    update: ProgressUpdate,
) -> SchedulerResult<()> {
    let Some(mut record) = store.get(id).await? else {
        return Ok(());
    };
    if record.is_terminal() {
        return Ok(());
    }
    record.set_progress(update.percent, update.message);
    record.touch_heartbeat();
    store.save(&record).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcraft_models::{
        MergeInput, Region, TaskConfig, TaskKind, VideoMergeConfig, WatermarkRemovalConfig,
    };
    use mcraft_store::MemoryStore;
    use std::time::Duration;

    use crate::engine::EngineOutput;

    /// Engine that sleeps, honoring cancellation between progress checks.
    struct SleepEngine {
        duration: Duration,
    }

    #[async_trait]
    impl TaskEngine for SleepEngine {
        async fn process(
            &self,
            task: &TaskRecord,
            ctx: EngineContext,
        ) -> Result<EngineOutput, EngineError> {
            let mut cancel = ctx.cancel.clone();
            tokio::select! {
                _ = tokio::time::sleep(self.duration) => Ok(EngineOutput {
                    output_location: format!("/data/results/{}.mp4", task.id).into(),
                }),
                _ = cancel.changed() => Err(EngineError::Cancelled),
            }
        }
    }

    /// Engine that fails partway through.
    struct FailEngine;

    #[async_trait]
    impl TaskEngine for FailEngine {
        async fn process(
            &self,
            _task: &TaskRecord,
            ctx: EngineContext,
        ) -> Result<EngineOutput, EngineError> {
            ctx.progress.report(30, "about to break");
            Err(EngineError::failed("simulated execution error"))
        }
    }

    /// Engine that reports progress then idles.
    struct ProgressEngine;

    #[async_trait]
    impl TaskEngine for ProgressEngine {
        async fn process(
            &self,
            task: &TaskRecord,
            ctx: EngineContext,
        ) -> Result<EngineOutput, EngineError> {
            ctx.progress.report(55, "halfway");
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(EngineOutput {
                output_location: format!("/data/results/{}.mp4", task.id).into(),
            })
        }
    }

    fn watermark_config() -> TaskConfig {
        TaskConfig::WatermarkRemoval(WatermarkRemovalConfig {
            input: "/data/uploads/a.mp4".into(),
            regions: vec![Region::new(0, 0, 64, 32)],
        })
    }

    fn merge_config() -> TaskConfig {
        TaskConfig::VideoMerge(VideoMergeConfig {
            inputs: vec![
                MergeInput::full("/data/uploads/a.mp4"),
                MergeInput::full("/data/uploads/b.mp4"),
            ],
        })
    }

    fn test_config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent,
            max_queue_size: 10,
            dispatch_interval: Duration::from_millis(50),
            health_interval: Duration::from_secs(3600),
            queued_timeout: Duration::from_secs(900),
            processing_timeout: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    fn scheduler_with(
        config: SchedulerConfig,
        engine: Arc<dyn TaskEngine>,
    ) -> (Scheduler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(config, store.clone());
        scheduler.register_engine(TaskKind::WatermarkRemoval, engine.clone());
        scheduler.register_engine(TaskKind::VideoMerge, engine);
        (scheduler, store)
    }

    #[tokio::test]
    async fn test_concurrency_bound_and_fifo_queue() {
        let (scheduler, _store) = scheduler_with(
            test_config(2),
            Arc::new(SleepEngine {
                duration: Duration::from_millis(400),
            }),
        );
        scheduler.start();

        let first = scheduler.submit("s1", watermark_config()).await.unwrap();
        let second = scheduler.submit("s1", watermark_config()).await.unwrap();
        let third = scheduler.submit("s1", merge_config()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        // Exactly bound tasks processing, the last-submitted one queued
        assert_eq!(
            scheduler.status_of(&first).await.unwrap().status,
            TaskStatus::Processing
        );
        assert_eq!(
            scheduler.status_of(&second).await.unwrap().status,
            TaskStatus::Processing
        );
        assert_eq!(
            scheduler.status_of(&third).await.unwrap().status,
            TaskStatus::Queued
        );

        let snapshot = scheduler.queue_status().await;
        assert_eq!(snapshot.active, 2);
        assert_eq!(snapshot.waiting, 1);

        // After the first wave finishes the queued task is promoted
        tokio::time::sleep(Duration::from_millis(500)).await;
        let third_record = scheduler.status_of(&third).await.unwrap();
        assert!(matches!(
            third_record.status,
            TaskStatus::Processing | TaskStatus::Completed
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(
            scheduler.status_of(&third).await.unwrap().status,
            TaskStatus::Completed
        );
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_active_never_exceeds_bound() {
        let (scheduler, store) = scheduler_with(
            test_config(2),
            Arc::new(SleepEngine {
                duration: Duration::from_millis(200),
            }),
        );
        scheduler.start();

        for _ in 0..6 {
            scheduler.submit("s1", watermark_config()).await.unwrap();
        }

        // Sample processing counts while the backlog drains
        for _ in 0..12 {
            let processing = store
                .list_by_status(TaskStatus::Processing)
                .await
                .unwrap()
                .len();
            assert!(processing <= 2, "bound violated: {} processing", processing);
            tokio::time::sleep(Duration::from_millis(60)).await;
        }
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_is_certain() {
        let (scheduler, _store) = scheduler_with(
            test_config(1),
            Arc::new(SleepEngine {
                duration: Duration::from_millis(300),
            }),
        );
        scheduler.start();

        let _running = scheduler.submit("s1", watermark_config()).await.unwrap();
        let queued = scheduler.submit("s1", watermark_config()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = scheduler.cancel(&queued).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Queued);

        let record = scheduler.status_of(&queued).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);

        // Never started, even after the slot frees up
        tokio::time::sleep(Duration::from_millis(600)).await;
        let record = scheduler.status_of(&queued).await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.started_at.is_none());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_processing_requests_interrupt() {
        let (scheduler, _store) = scheduler_with(
            test_config(1),
            Arc::new(SleepEngine {
                duration: Duration::from_secs(30),
            }),
        );

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = scheduler.cancel(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::RequestedInterrupt);

        // The engine observes the signal and the record lands cancelled
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            scheduler.status_of(&id).await.unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_terminal_task() {
        let (scheduler, _store) = scheduler_with(test_config(1), Arc::new(FailEngine));

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = scheduler.cancel(&id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let (scheduler, _store) = scheduler_with(test_config(1), Arc::new(FailEngine));
        let missing = TaskId::new();
        assert!(matches!(
            scheduler.cancel(&missing).await,
            Err(SchedulerError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_engine_frees_slot() {
        let (scheduler, _store) = scheduler_with(test_config(1), Arc::new(FailEngine));
        scheduler.start();

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = scheduler.status_of(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        let message = record.error_message.unwrap();
        assert!(!message.is_empty());
        assert!(message.contains("simulated execution error"));

        // The freed slot accepts new work
        let snapshot = scheduler.queue_status().await;
        assert_eq!(snapshot.active, 0);

        let next = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            scheduler.status_of(&next).await.unwrap().status,
            TaskStatus::Failed
        );
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_validation_failure_is_fatal() {
        let (scheduler, _store) = scheduler_with(
            test_config(1),
            Arc::new(SleepEngine {
                duration: Duration::from_millis(50),
            }),
        );

        // Merge with a single input fails validation before the engine runs
        let config = TaskConfig::VideoMerge(VideoMergeConfig {
            inputs: vec![MergeInput::full("/data/uploads/a.mp4")],
        });
        let id = scheduler.submit("s1", config).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = scheduler.status_of(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record
            .error_message
            .unwrap()
            .contains("at least 2 input files"));
    }

    #[tokio::test]
    async fn test_missing_engine_fails_task() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(test_config(1), store);

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = scheduler.status_of(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record
            .error_message
            .unwrap()
            .contains("No executor registered"));
    }

    #[tokio::test]
    async fn test_health_loop_reaps_stuck_processing_task() {
        let mut config = test_config(1);
        config.processing_timeout = Duration::from_secs(0);
        let (scheduler, _store) = scheduler_with(
            config,
            Arc::new(SleepEngine {
                duration: Duration::from_secs(60),
            }),
        );

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let (timed_out, _) = scheduler.check_health_once().await.unwrap();
        assert_eq!(timed_out, 1);

        let record = scheduler.status_of(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error_message.unwrap().contains("timeout"));

        // Slot is free again
        let snapshot = scheduler.queue_status().await;
        assert_eq!(snapshot.active, 0);
    }

    #[tokio::test]
    async fn test_health_loop_reaps_stuck_queued_task() {
        let mut config = test_config(0);
        config.queued_timeout = Duration::from_secs(0);
        let (scheduler, _store) = scheduler_with(
            config,
            Arc::new(SleepEngine {
                duration: Duration::from_millis(50),
            }),
        );

        // With zero slots the submission stays queued
        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let (timed_out, _) = scheduler.check_health_once().await.unwrap();
        assert_eq!(timed_out, 1);
        assert_eq!(
            scheduler.status_of(&id).await.unwrap().status,
            TaskStatus::Failed
        );

        // Removed from the wait queue; dispatch never resurrects it
        assert_eq!(scheduler.dispatch_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_loop_refreshes_heartbeat() {
        let (scheduler, _store) = scheduler_with(
            test_config(1),
            Arc::new(SleepEngine {
                duration: Duration::from_millis(500),
            }),
        );

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let before = scheduler.status_of(&id).await.unwrap().last_heartbeat;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (timed_out, refreshed) = scheduler.check_health_once().await.unwrap();
        assert_eq!(timed_out, 0);
        assert_eq!(refreshed, 1);

        let after = scheduler.status_of(&id).await.unwrap().last_heartbeat;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_progress_is_persisted() {
        let (scheduler, _store) = scheduler_with(test_config(1), Arc::new(ProgressEngine));

        let id = scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let record = scheduler.status_of(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Processing);
        assert_eq!(record.progress_percent, 55);
        assert_eq!(record.progress_message.as_deref(), Some("halfway"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let record = scheduler.status_of(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress_percent, 100);
        assert!(record.output_location.is_some());
    }

    #[tokio::test]
    async fn test_can_accept_reports_backpressure() {
        let mut config = test_config(1);
        config.max_queue_size = 1;
        let (scheduler, _store) = scheduler_with(
            config,
            Arc::new(SleepEngine {
                duration: Duration::from_secs(30),
            }),
        );

        let admission = scheduler.can_accept().await;
        assert!(admission.accepted);

        scheduler.submit("s1", watermark_config()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let admission = scheduler.can_accept().await;
        assert!(admission.accepted);
        assert!(admission.message.contains("queued"));

        scheduler.submit("s1", watermark_config()).await.unwrap();
        let admission = scheduler.can_accept().await;
        assert!(!admission.accepted);
        assert!(admission.message.contains("full"));

        // Advisory only: submit still succeeds past the cap
        let over = scheduler.submit("s1", watermark_config()).await;
        assert!(over.is_ok());
    }

    #[tokio::test]
    async fn test_submission_order_preserved_in_queue() {
        let (scheduler, _store) = scheduler_with(
            test_config(1),
            Arc::new(SleepEngine {
                duration: Duration::from_millis(120),
            }),
        );
        scheduler.start();

        let _running = scheduler.submit("s1", watermark_config()).await.unwrap();
        let queued_a = scheduler.submit("s1", watermark_config()).await.unwrap();
        let queued_b = scheduler.submit("s1", watermark_config()).await.unwrap();

        // queued_a must start before queued_b
        tokio::time::sleep(Duration::from_millis(250)).await;
        let a = scheduler.status_of(&queued_a).await.unwrap();
        let b = scheduler.status_of(&queued_b).await.unwrap();
        assert!(a.started_at.is_some());
        if let Some(b_started) = b.started_at {
            assert!(a.started_at.unwrap() <= b_started);
        }
        scheduler.shutdown().await;
    }
}
