//! Priority task scheduler with per-source mutual exclusion.
//!
//! Tasks wait in one FIFO queue per [`TaskPriority`]. A dispatcher task pulls
//! eligible tasks (higher classes first, at most one running task per source)
//! and spawns a worker for each. Each worker runs under a supervisor that
//! observes its join handle, so a panicking or aborted worker still releases
//! its source and produces a failed [`SyncResult`].
//!
//! Retryable failures go back to the tail of their queue with a backoff
//! deadline; final failures may be replaced by fallback data.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::entity::marketplace::Marketplace;
use crate::resilience::ErrorClassifier;

use super::executor::SyncExecutor;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::resources::{ResourceProbe, ResourceUsage};
use super::types::{
    SyncOptions, SyncResult, SyncStatus, SyncTask, TaskId, TaskPriority, TaskState, TaskStatus,
};

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub max_concurrent_marketplaces: usize,
    /// Dispatch stalls while CPU usage is above this percentage.
    pub cpu_ceiling: f64,
    /// Dispatch stalls while memory usage is above this percentage.
    pub memory_ceiling: f64,
    pub poll_interval_ms: u64,
    /// Completed results kept for `get_result`.
    pub history_limit: usize,
    pub default_max_retries: u32,
    pub shutdown_timeout_secs: u64,
    /// Ask the executor for substitute data when a task fails for good.
    pub fallback_on_failure: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_concurrent_marketplaces: 2,
            cpu_ceiling: 90.0,
            memory_ceiling: 90.0,
            poll_interval_ms: 1000,
            history_limit: 100,
            default_max_retries: 3,
            shutdown_timeout_secs: 30,
            fallback_on_failure: true,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    fn concurrency(&self) -> usize {
        self.max_workers.min(self.max_concurrent_marketplaces).max(1)
    }
}

/// Snapshot returned by [`ParallelSyncManager::metrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_succeeded: u64,
    pub tasks_partial: u64,
    pub tasks_failed: u64,
    pub tasks_fallback: u64,
    pub tasks_retried: u64,
    pub tasks_cancelled: u64,
    pub queued: usize,
    pub running: usize,
    pub records_processed: u64,
    /// Completed tasks per minute since the scheduler was created.
    pub throughput_per_minute: f64,
    pub records_per_second: f64,
    /// Share of completed tasks that ended `success`, in percent.
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub resource_usage: ResourceUsage,
    pub uptime_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: u64,
    succeeded: u64,
    partial: u64,
    failed: u64,
    fallback: u64,
    retried: u64,
    cancelled: u64,
    records_processed: u64,
    total_duration_ms: u64,
}

impl Counters {
    fn completed(&self) -> u64 {
        self.succeeded + self.partial + self.failed + self.fallback
    }

    fn record(&mut self, result: &SyncResult) {
        match result.status {
            SyncStatus::Success => self.succeeded += 1,
            SyncStatus::Partial => self.partial += 1,
            SyncStatus::Failed => self.failed += 1,
            SyncStatus::Fallback => self.fallback += 1,
        }
        self.records_processed += result.records_processed;
        self.total_duration_ms += u64::try_from(result.duration_ms()).unwrap_or(0);
    }
}

#[derive(Default)]
struct SchedulerState {
    queues: [VecDeque<SyncTask>; 4],
    /// Source -> the task currently holding it.
    running: HashMap<Marketplace, TaskId>,
    running_tasks: HashMap<TaskId, SyncTask>,
    aborts: HashMap<TaskId, AbortHandle>,
    history: VecDeque<(TaskId, SyncResult)>,
    counters: Counters,
}

impl SchedulerState {
    fn queued_len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn find_queued(&self, id: TaskId) -> Option<&SyncTask> {
        self.queues.iter().flatten().find(|t| t.id == id)
    }

    fn release(&mut self, task: &SyncTask) {
        if self.running.get(&task.source) == Some(&task.id) {
            self.running.remove(&task.source);
        }
        self.running_tasks.remove(&task.id);
        self.aborts.remove(&task.id);
    }

    fn push_history(&mut self, id: TaskId, result: SyncResult, limit: usize) {
        self.counters.record(&result);
        self.history.push_back((id, result));
        while self.history.len() > limit.max(1) {
            self.history.pop_front();
        }
    }

    /// Pull up to `capacity - running` eligible tasks and mark them running.
    ///
    /// Each queue is rotated at most once: blocked or not-yet-ready tasks go
    /// to the tail, preserving FIFO order among themselves.
    fn take_ready(&mut self, capacity: usize, now: Instant) -> Vec<SyncTask> {
        let mut picked: Vec<SyncTask> = Vec::new();
        let mut slots = capacity.saturating_sub(self.running.len());

        for queue in &mut self.queues {
            let mut remaining = queue.len();
            while slots > 0 && remaining > 0 {
                remaining -= 1;
                let Some(mut task) = queue.pop_front() else {
                    break;
                };
                if self.running.contains_key(&task.source) || !task.is_ready(now) {
                    queue.push_back(task);
                    continue;
                }
                task.state = TaskState::Running;
                task.started_at = Some(Utc::now());
                task.not_before = None;
                self.running.insert(task.source, task.id);
                self.running_tasks.insert(task.id, task.clone());
                picked.push(task);
                slots -= 1;
            }
        }
        picked
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.queues
            .iter()
            .flatten()
            .filter_map(|t| t.not_before)
            .min()
    }
}

struct Shared {
    config: SchedulerConfig,
    executor: Arc<dyn SyncExecutor>,
    classifier: Arc<ErrorClassifier>,
    probe: Arc<dyn ResourceProbe>,
    on_progress: Option<ProgressCallback>,
    shutdown: Arc<AtomicBool>,
    state: Mutex<SchedulerState>,
    /// Wakes the dispatcher.
    wake: Notify,
    /// Signalled whenever a task leaves the running set.
    settled: Notify,
    created: Instant,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let poll = self.config.poll_interval();
        tracing::debug!(
            workers = self.config.max_workers,
            marketplaces = self.config.max_concurrent_marketplaces,
            "Dispatcher started"
        );

        loop {
            if self.is_shutting_down() {
                break;
            }

            let usage = self.probe.sample();
            if usage.exceeds(self.config.cpu_ceiling, self.config.memory_ceiling) {
                tracing::warn!(
                    cpu = usage.cpu_percent,
                    memory = usage.memory_percent,
                    "Resource ceiling exceeded, pausing dispatch"
                );
                emit(
                    self.on_progress.as_ref(),
                    SyncProgress::ResourceStall {
                        cpu_percent: usage.cpu_percent,
                        memory_percent: usage.memory_percent,
                    },
                );
                tokio::time::sleep(poll).await;
                continue;
            }

            let (ready, deadline) = {
                let mut state = self.lock();
                let ready = state.take_ready(self.config.concurrency(), Instant::now());
                (ready, state.next_deadline())
            };
            for task in ready {
                Arc::clone(&self).spawn_worker(task);
            }

            let wait = deadline
                .map(|d| d.saturating_duration_since(Instant::now()).min(poll))
                .unwrap_or(poll);
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::debug!("Dispatcher stopped");
    }

    fn spawn_worker(self: Arc<Self>, task: SyncTask) {
        tracing::info!(
            task = %task.id,
            source = %task.source,
            priority = %task.priority,
            attempt = task.retry_count + 1,
            "Dispatching task"
        );
        emit(
            self.on_progress.as_ref(),
            SyncProgress::TaskStarted {
                task_id: task.id,
                source: task.source,
                attempt: task.retry_count + 1,
            },
        );

        let executor = Arc::clone(&self.executor);
        let job = task.clone();
        let worker: JoinHandle<SyncResult> =
            tokio::spawn(async move { executor.execute(&job).await });
        self.lock().aborts.insert(task.id, worker.abort_handle());

        tokio::spawn(async move {
            let started_at = task.started_at.unwrap_or_else(Utc::now);
            let result = match worker.await {
                Ok(result) => result,
                Err(e) => {
                    let message = if e.is_panic() {
                        "worker panicked"
                    } else {
                        "worker cancelled"
                    };
                    tracing::error!(task = %task.id, source = %task.source, "{message}");
                    SyncResult::failed(task.source, started_at, message)
                }
            };
            self.on_complete(task, result).await;
        });
    }

    async fn on_complete(&self, mut task: SyncTask, mut result: SyncResult) {
        if result.status == SyncStatus::Failed
            && !self.is_shutting_down()
            && let Some(ctx) = &result.error
        {
            let mut attempt = ctx.clone();
            attempt.attempt_number = task.retry_count + 1;
            if self
                .classifier
                .should_retry_within(&attempt, task.max_retries + 1)
            {
                let delay = self.classifier.backoff_delay(&attempt);
                self.requeue(task, &result, delay);
                return;
            }
        }

        if result.status == SyncStatus::Failed
            && self.config.fallback_on_failure
            && task.options.allow_fallback
            && !self.is_shutting_down()
        {
            let substitute = self.executor.fallback(&task, &result).await;
            if let Some(substitute) = substitute {
                result = substitute;
            }
        }

        task.state = if result.status == SyncStatus::Failed {
            TaskState::Failed
        } else {
            TaskState::Succeeded
        };
        task.completed_at = Some(result.completed_at);
        task.error = result.error_message.clone();

        tracing::info!(
            task = %task.id,
            source = %task.source,
            status = %result.status,
            records = result.records_processed,
            duration_ms = result.duration_ms(),
            "Task finished"
        );
        let event = SyncProgress::TaskCompleted {
            task_id: task.id,
            source: task.source,
            status: result.status,
            records_processed: result.records_processed,
            duration_ms: result.duration_ms(),
        };

        {
            let mut state = self.lock();
            state.release(&task);
            state.push_history(task.id, result, self.config.history_limit);
        }
        emit(self.on_progress.as_ref(), event);
        self.settled.notify_waiters();
        self.wake.notify_one();
    }

    fn requeue(&self, mut task: SyncTask, result: &SyncResult, delay: Duration) {
        task.retry_count += 1;
        task.state = TaskState::Retrying;
        task.error = result.error_message.clone();
        task.not_before = Some(Instant::now() + delay);

        tracing::warn!(
            task = %task.id,
            source = %task.source,
            retry = task.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = result.error_message.as_deref().unwrap_or_default(),
            "Task failed, retrying"
        );
        let event = SyncProgress::TaskRetrying {
            task_id: task.id,
            source: task.source,
            retry_count: task.retry_count,
            delay_ms: delay.as_millis() as u64,
            error: result.error_message.clone().unwrap_or_default(),
        };

        {
            let mut state = self.lock();
            state.release(&task);
            state.counters.retried += 1;
            let slot = task.priority.index();
            state.queues[slot].push_back(task);
        }
        emit(self.on_progress.as_ref(), event);
        self.settled.notify_waiters();
        self.wake.notify_one();
    }

    /// Record a task that never ran as failed.
    fn abandon(&self, task: SyncTask, message: &str) {
        let result = SyncResult::failed(task.source, task.created_at, message);
        let mut state = self.lock();
        state.counters.cancelled += 1;
        state.push_history(task.id, result, self.config.history_limit);
    }

    async fn wait_idle(&self) {
        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.lock().running_tasks.is_empty() {
                return;
            }
            settled.await;
        }
    }
}

/// Bounded pool of tokio tasks draining four priority queues.
pub struct ParallelSyncManager {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ParallelSyncManager {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<dyn SyncExecutor>,
        classifier: Arc<ErrorClassifier>,
        probe: Arc<dyn ResourceProbe>,
        shutdown: Arc<AtomicBool>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                executor,
                classifier,
                probe,
                on_progress,
                shutdown,
                state: Mutex::new(SchedulerState::default()),
                wake: Notify::new(),
                settled: Notify::new(),
                created: Instant::now(),
            }),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Start the dispatcher. Calling it again is a no-op.
    pub fn start(&self) {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner());
        if dispatcher.is_some() || self.shared.is_shutting_down() {
            return;
        }
        *dispatcher = Some(tokio::spawn(Arc::clone(&self.shared).dispatch_loop()));
    }

    /// Queue a task for `source`.
    pub fn submit(
        &self,
        source: Marketplace,
        priority: TaskPriority,
        options: SyncOptions,
    ) -> TaskId {
        let task = SyncTask::new(source, priority, self.shared.config.default_max_retries)
            .with_options(options);
        let id = task.id;

        if self.shared.is_shutting_down() {
            tracing::warn!(source = %source, "Scheduler is shut down, rejecting task");
            let mut state = self.shared.lock();
            state.counters.submitted += 1;
            drop(state);
            self.shared.abandon(task, "scheduler is shut down");
            self.shared.settled.notify_waiters();
            return id;
        }

        {
            let mut state = self.shared.lock();
            state.counters.submitted += 1;
            state.queues[priority.index()].push_back(task);
        }
        tracing::debug!(task = %id, source = %source, priority = %priority, "Task queued");
        emit(
            self.shared.on_progress.as_ref(),
            SyncProgress::TaskQueued {
                task_id: id,
                source,
                priority,
            },
        );
        self.shared.wake.notify_one();
        id
    }

    pub fn get_result(&self, id: TaskId) -> TaskStatus {
        let state = self.shared.lock();
        if state.running_tasks.contains_key(&id) {
            return TaskStatus::Pending(TaskState::Running);
        }
        if let Some(task) = state.find_queued(id) {
            return TaskStatus::Pending(task.state);
        }
        state
            .history
            .iter()
            .rev()
            .find(|(tid, _)| *tid == id)
            .map(|(_, result)| TaskStatus::Completed(result.clone()))
            .unwrap_or(TaskStatus::Unknown)
    }

    /// Wait until a task completes. `None` for unknown ids.
    pub async fn wait_for(&self, id: TaskId) -> Option<SyncResult> {
        loop {
            let settled = self.shared.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            match self.get_result(id) {
                TaskStatus::Completed(result) => return Some(result),
                TaskStatus::Unknown => return None,
                TaskStatus::Pending(_) => {}
            }
            settled.await;
        }
    }

    /// Remove a queued task. Running tasks cannot be cancelled.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = {
            let mut state = self.shared.lock();
            state.queues.iter_mut().find_map(|queue| {
                let pos = queue.iter().position(|t| t.id == id)?;
                queue.remove(pos)
            })
        };
        let Some(task) = task else {
            return false;
        };

        tracing::info!(task = %id, source = %task.source, "Task cancelled");
        self.shared.abandon(task, "cancelled");
        self.shared.settled.notify_waiters();
        true
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queued_len()
    }

    /// Sources with a running task.
    pub fn running_sources(&self) -> HashSet<Marketplace> {
        self.shared.lock().running.keys().copied().collect()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        let resource_usage = self.shared.probe.sample();
        let elapsed = self.shared.created.elapsed();
        let state = self.shared.lock();
        let c = &state.counters;
        let completed = c.completed();

        let secs = elapsed.as_secs_f64();
        let per_second = |n: u64| if secs > 0.0 { n as f64 / secs } else { 0.0 };

        PerformanceMetrics {
            tasks_submitted: c.submitted,
            tasks_completed: completed,
            tasks_succeeded: c.succeeded,
            tasks_partial: c.partial,
            tasks_failed: c.failed,
            tasks_fallback: c.fallback,
            tasks_retried: c.retried,
            tasks_cancelled: c.cancelled,
            queued: state.queued_len(),
            running: state.running_tasks.len(),
            records_processed: c.records_processed,
            throughput_per_minute: per_second(completed) * 60.0,
            records_per_second: per_second(c.records_processed),
            success_rate: if completed > 0 {
                c.succeeded as f64 / completed as f64 * 100.0
            } else {
                0.0
            },
            average_duration_ms: if completed > 0 {
                c.total_duration_ms as f64 / completed as f64
            } else {
                0.0
            },
            resource_usage,
            uptime_secs: elapsed.as_secs(),
        }
    }

    /// Stop dispatching, wait for running workers, fail what is still queued.
    ///
    /// Workers still running after `shutdown_timeout` are aborted.
    pub async fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = dispatcher
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Dispatcher ended abnormally");
        }

        let timeout = self.shared.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.shared.wait_idle()).await.is_err() {
            let aborts: Vec<AbortHandle> = self.shared.lock().aborts.values().cloned().collect();
            tracing::warn!(
                workers = aborts.len(),
                timeout_secs = timeout.as_secs(),
                "Workers still running at shutdown, aborting"
            );
            for handle in aborts {
                handle.abort();
            }
            let grace = self.shared.config.poll_interval();
            let _ = tokio::time::timeout(grace, self.shared.wait_idle()).await;
        }

        let drained: Vec<SyncTask> = {
            let mut state = self.shared.lock();
            let drained = state.queues.iter_mut().flat_map(|q| q.drain(..)).collect();
            let stuck: Vec<SyncTask> = state.running_tasks.drain().map(|(_, t)| t).collect();
            state.running.clear();
            state.aborts.clear();
            for task in stuck {
                let result = SyncResult::failed(task.source, task.created_at, "shutdown");
                state.push_history(task.id, result, self.shared.config.history_limit);
            }
            drained
        };
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Dropping queued tasks at shutdown");
        }
        for task in drained {
            self.shared.abandon(task, "shutdown before dispatch");
        }
        self.shared.settled.notify_waiters();
    }
}

impl Drop for ParallelSyncManager {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
