//! Progress reporting types for sync operations.

use std::sync::Arc;

use crate::entity::marketplace::Marketplace;

use super::types::{SyncStatus, TaskId, TaskPriority};

/// Progress events emitted while tasks are scheduled and run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// A task entered the queue.
    TaskQueued {
        task_id: TaskId,
        source: Marketplace,
        priority: TaskPriority,
    },

    /// A worker picked up a task.
    TaskStarted {
        task_id: TaskId,
        source: Marketplace,
        /// 1 for the first run, incremented on every retry.
        attempt: u32,
    },

    /// Fetched a page of raw items.
    FetchedPage {
        source: Marketplace,
        /// Page number (1-indexed).
        page: u32,
        count: usize,
        from_cache: bool,
    },

    /// A batch of normalized records was handed to the sink.
    PersistedBatch {
        source: Marketplace,
        inserted: u64,
        updated: u64,
        failed: u64,
    },

    /// A failed task was re-queued.
    TaskRetrying {
        task_id: TaskId,
        source: Marketplace,
        retry_count: u32,
        delay_ms: u64,
        error: String,
    },

    /// A task reached a terminal state.
    TaskCompleted {
        task_id: TaskId,
        source: Marketplace,
        status: SyncStatus,
        records_processed: u64,
        duration_ms: i64,
    },

    /// Substitute data was used for a failed source.
    FallbackUsed {
        source: Marketplace,
        /// "cached" or "estimate".
        kind: &'static str,
        records: u64,
    },

    /// Dispatch paused because the host is over its resource ceiling.
    ResourceStall { cpu_percent: f64, memory_percent: f64 },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Callback for progress updates; shared between the dispatcher and workers.
pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
