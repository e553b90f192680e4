//! Task scheduling and the per-source sync loop.
//!
//! # Module Structure
//!
//! - [`types`] - Core types: `SyncTask`, `SyncResult`, `SyncOptions`, priorities
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - [`engine`] - The pagination loop: `sync_source()`
//! - [`executor`] - How a worker runs a task: `SyncExecutor`, `SourceSyncExecutor`
//! - [`scheduler`] - Priority queues and workers: `ParallelSyncManager`
//! - [`run_log`] - Persisted run history
//!
//! # Example
//!
//! ```ignore
//! use stocksync::sync::{ParallelSyncManager, SyncOptions, TaskPriority};
//! use stocksync::Marketplace;
//!
//! async fn run(manager: &ParallelSyncManager) {
//!     manager.start();
//!     let id = manager.submit(Marketplace::Ozon, TaskPriority::High, SyncOptions::default());
//!     if let Some(result) = manager.wait_for(id).await {
//!         println!("{}: {} records", result.status, result.records_processed);
//!     }
//! }
//! ```

pub mod engine;
mod executor;
mod progress;
mod resources;
pub mod run_log;
mod scheduler;
mod types;

// Re-export types
pub use types::{
    SyncOptions, SyncResult, SyncStatus, SyncTask, TaskId, TaskPriority, TaskState, TaskStatus,
};

// Re-export constants
pub use types::{DEFAULT_ESTIMATE_DAYS_BACK, DEFAULT_FALLBACK_MAX_AGE_HOURS, DEFAULT_MAX_PAGES};

// Re-export progress types
pub use progress::{ProgressCallback, SyncProgress, emit};

pub use engine::{EngineContext, sync_source};
pub use executor::{SourceSyncExecutor, SyncExecutor};
pub use resources::{FixedProbe, ResourceProbe, ResourceUsage, SystemProbe};
pub use scheduler::{ParallelSyncManager, PerformanceMetrics, SchedulerConfig};
