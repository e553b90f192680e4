//! Task, result and option types shared by the engine and the scheduler.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::marketplace::Marketplace;
use crate::entity::sync_log::RunStatus;
use crate::resilience::ErrorContext;

/// Default safety cap on pages fetched in one run.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// Default age limit for cached snapshots used as a fallback.
pub const DEFAULT_FALLBACK_MAX_AGE_HOURS: i64 = 48;

/// Default history window used for statistical estimates.
pub const DEFAULT_ESTIMATE_DAYS_BACK: i64 = 30;

/// Final status of a synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
    /// Data was substituted from cache or history; never a live success.
    Fallback,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
            SyncStatus::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SyncStatus> for RunStatus {
    fn from(status: SyncStatus) -> Self {
        match status {
            SyncStatus::Success => RunStatus::Success,
            SyncStatus::Partial => RunStatus::Partial,
            SyncStatus::Failed => RunStatus::Failed,
            SyncStatus::Fallback => RunStatus::Fallback,
        }
    }
}

/// Result of one synchronization task.
///
/// `records_inserted + records_failed <= records_processed` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub source: Marketplace,
    pub status: SyncStatus,
    pub records_processed: u64,
    pub records_updated: u64,
    pub records_inserted: u64,
    pub records_failed: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub api_requests_count: u32,
    /// Run-log session the records were written under, if any.
    pub session_id: Option<Uuid>,
    /// Classified error that ended the run, if it failed on a marketplace call.
    pub error: Option<ErrorContext>,
}

impl SyncResult {
    /// A failed result with no records.
    pub fn failed(source: Marketplace, started_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            source,
            status: SyncStatus::Failed,
            records_processed: 0,
            records_updated: 0,
            records_inserted: 0,
            records_failed: 0,
            started_at,
            completed_at: Utc::now(),
            error_message: Some(message.into()),
            api_requests_count: 0,
            session_id: None,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds().max(0)
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Success
    }
}

/// Scheduling priority; higher classes are always drained first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// All priorities, highest first.
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Identifier handed back by `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a task inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    /// Failed with a retryable error; waiting in its queue for the backoff to pass.
    Retrying,
    Succeeded,
    Failed,
}

/// What `get_result` reports for a task id.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending(TaskState),
    Completed(SyncResult),
    Unknown,
}

/// Per-task knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Substitute cached or estimated data when the run fails for good.
    pub allow_fallback: bool,
    pub max_pages: usize,
    /// Snapshot date to write; defaults to today (UTC).
    pub snapshot_date: Option<NaiveDate>,
    pub fallback_max_age_hours: i64,
    pub estimate_days_back: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            allow_fallback: true,
            max_pages: DEFAULT_MAX_PAGES,
            snapshot_date: None,
            fallback_max_age_hours: DEFAULT_FALLBACK_MAX_AGE_HOURS,
            estimate_days_back: DEFAULT_ESTIMATE_DAYS_BACK,
        }
    }
}

/// A unit of work owned by the scheduler.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub id: TaskId,
    pub source: Marketplace,
    pub task_type: String,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<SyncResult>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub options: SyncOptions,
    /// Not eligible for dispatch before this instant (retry backoff).
    pub not_before: Option<tokio::time::Instant>,
}

impl SyncTask {
    pub fn new(source: Marketplace, priority: TaskPriority, max_retries: u32) -> Self {
        Self {
            id: TaskId::new(),
            source,
            task_type: "stocks".to_string(),
            priority,
            state: TaskState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            options: SyncOptions::default(),
            not_before: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn is_ready(&self, now: tokio::time::Instant) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}
