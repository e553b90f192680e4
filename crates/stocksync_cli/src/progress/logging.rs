use stocksync::sync::{SyncProgress, SyncStatus};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::TaskQueued {
                task_id,
                source,
                priority,
            } => {
                tracing::debug!(task_id = %task_id, source = %source, priority = %priority, "Sync queued");
            }

            SyncProgress::TaskStarted {
                task_id,
                source,
                attempt,
            } => {
                if attempt > 1 {
                    tracing::info!(task_id = %task_id, source = %source, attempt, "Retrying sync");
                } else {
                    tracing::info!(task_id = %task_id, source = %source, "Sync started");
                }
            }

            SyncProgress::FetchedPage {
                source,
                page,
                count,
                from_cache,
            } => {
                tracing::debug!(source = %source, page, count, from_cache, "Fetched page");
            }

            SyncProgress::PersistedBatch {
                source,
                inserted,
                updated,
                failed,
            } => {
                if failed > 0 {
                    tracing::warn!(source = %source, inserted, updated, failed, "Batch persisted with failures");
                } else {
                    tracing::debug!(source = %source, inserted, updated, "Batch persisted");
                }
            }

            SyncProgress::TaskRetrying {
                task_id,
                source,
                retry_count,
                delay_ms,
                error,
            } => {
                tracing::warn!(
                    task_id = %task_id,
                    source = %source,
                    retry_count,
                    delay_ms,
                    error = %error,
                    "Sync failed, backing off"
                );
            }

            SyncProgress::TaskCompleted {
                task_id,
                source,
                status,
                records_processed,
                duration_ms,
            } => match status {
                SyncStatus::Failed => {
                    tracing::error!(task_id = %task_id, source = %source, duration_ms, "Sync failed");
                }
                _ => {
                    tracing::info!(
                        task_id = %task_id,
                        source = %source,
                        status = %status,
                        records_processed,
                        duration_ms,
                        "Sync complete"
                    );
                }
            },

            SyncProgress::FallbackUsed {
                source,
                kind,
                records,
            } => {
                tracing::warn!(source = %source, kind, records, "Using fallback data");
            }

            SyncProgress::ResourceStall {
                cpu_percent,
                memory_percent,
            } => {
                tracing::debug!(cpu_percent, memory_percent, "Dispatch paused on resource ceiling");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
