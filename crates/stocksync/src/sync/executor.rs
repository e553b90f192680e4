//! How a scheduler worker runs one task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use uuid::Uuid;

use crate::entity::marketplace::Marketplace;
use crate::fallback::FallbackManager;
use crate::inventory::{self, InventoryError, InventorySink};
use crate::platform::AdaptiveBatcher;
use crate::resilience::ResilientClient;
use crate::status::OperationStatus;

use super::engine::{EngineContext, sync_source};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::run_log;
use super::types::{SyncResult, SyncStatus, SyncTask};

/// Runs tasks on behalf of the scheduler.
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// Run one attempt of a task. Failures are reported in the result.
    async fn execute(&self, task: &SyncTask) -> SyncResult;

    /// Substitute data for a task that failed for good.
    ///
    /// Returns `None` when no substitute is available.
    async fn fallback(&self, _task: &SyncTask, _failed: &SyncResult) -> Option<SyncResult> {
        None
    }
}

/// Production executor: pagination loop, persistence and the fallback chain.
pub struct SourceSyncExecutor {
    clients: HashMap<Marketplace, Arc<ResilientClient>>,
    sink: Arc<dyn InventorySink>,
    batcher: Arc<AdaptiveBatcher>,
    db: DatabaseConnection,
    fallback: FallbackManager,
    on_progress: Option<ProgressCallback>,
}

impl SourceSyncExecutor {
    pub fn new(
        db: DatabaseConnection,
        sink: Arc<dyn InventorySink>,
        batcher: Arc<AdaptiveBatcher>,
        fallback: FallbackManager,
    ) -> Self {
        Self {
            clients: HashMap::new(),
            sink,
            batcher,
            db,
            fallback,
            on_progress: None,
        }
    }

    /// Register the client used for a marketplace.
    #[must_use]
    pub fn with_client(mut self, client: Arc<ResilientClient>) -> Self {
        self.clients.insert(client.marketplace(), client);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn sources(&self) -> impl Iterator<Item = Marketplace> + '_ {
        self.clients.keys().copied()
    }

    /// Roll back the rows a failed run wrote and mark the run recovered.
    async fn discard_partial_run(&self, session_id: Uuid) -> Result<u64, InventoryError> {
        let txn = self.db.begin().await?;
        let removed = inventory::delete_by_session(&txn, session_id).await?;
        run_log::mark_recovered(&txn, session_id).await?;
        txn.commit().await?;
        Ok(removed)
    }

    fn substitute(failed: &SyncResult, status_note: String) -> SyncResult {
        let original = failed.error_message.as_deref().unwrap_or("unknown error");
        SyncResult {
            source: failed.source,
            status: SyncStatus::Fallback,
            records_processed: 0,
            records_updated: 0,
            records_inserted: 0,
            records_failed: 0,
            started_at: failed.started_at,
            completed_at: Utc::now(),
            error_message: Some(format!("{status_note} (sync failed: {original})")),
            api_requests_count: failed.api_requests_count,
            session_id: None,
            error: failed.error.clone(),
        }
    }
}

#[async_trait]
impl SyncExecutor for SourceSyncExecutor {
    async fn execute(&self, task: &SyncTask) -> SyncResult {
        let started_at = Utc::now();
        let Some(client) = self.clients.get(&task.source) else {
            tracing::error!(source = %task.source, "No client configured");
            return SyncResult::failed(
                task.source,
                started_at,
                format!("no client configured for {}", task.source),
            );
        };

        let session_id = match run_log::start_run(&self.db, task.source, &task.task_type).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(source = %task.source, error = %e, "Could not open run log");
                return SyncResult::failed(task.source, started_at, format!("run log: {e}"));
            }
        };

        let ctx = EngineContext {
            client: client.as_ref(),
            sink: self.sink.as_ref(),
            batcher: self.batcher.as_ref(),
            on_progress: self.on_progress.as_ref(),
        };
        let mut result = sync_source(&ctx, session_id, &task.options).await;
        result.session_id = Some(session_id);

        if let Err(e) = run_log::finish_run(&self.db, session_id, &result).await {
            tracing::warn!(source = %task.source, session = %session_id, error = %e, "Could not close run log");
        }
        result
    }

    async fn fallback(&self, task: &SyncTask, failed: &SyncResult) -> Option<SyncResult> {
        let source = task.source;

        if let Some(session_id) = failed.session_id
            && failed.records_inserted + failed.records_updated > 0
        {
            match self.discard_partial_run(session_id).await {
                Ok(removed) => {
                    tracing::info!(source = %source, session = %session_id, removed, "Discarded partial run before fallback");
                }
                Err(e) => {
                    tracing::warn!(source = %source, session = %session_id, error = %e, "Could not discard partial run");
                }
            }
        }

        let cached = self
            .fallback
            .use_cached_data(source, task.options.fallback_max_age_hours)
            .await;
        match cached.status {
            OperationStatus::Success => {
                let mut result = Self::substitute(
                    failed,
                    format!(
                        "fallback: reused snapshot of {}",
                        cached.copied_from.map(|d| d.to_string()).unwrap_or_default()
                    ),
                );
                result.records_processed = cached.records_copied;
                result.records_inserted = cached.records_copied;
                result.session_id = cached.session_id;
                emit(
                    self.on_progress.as_ref(),
                    SyncProgress::FallbackUsed {
                        source,
                        kind: "cached",
                        records: cached.records_copied,
                    },
                );
                return Some(result);
            }
            OperationStatus::NoAction => {
                emit(
                    self.on_progress.as_ref(),
                    SyncProgress::FallbackUsed {
                        source,
                        kind: "cached",
                        records: 0,
                    },
                );
                return Some(Self::substitute(
                    failed,
                    "fallback: kept today's stored snapshot".to_string(),
                ));
            }
            _ => {}
        }

        let estimate = self
            .fallback
            .estimate_inventory_from_history(source, task.options.estimate_days_back)
            .await;
        if estimate.status == OperationStatus::Success {
            let keys = estimate.estimates.len() as u64;
            let mut result = Self::substitute(
                failed,
                format!(
                    "fallback: estimated {keys} stock levels from {} data points",
                    estimate.data_points
                ),
            );
            result.records_processed = keys;
            emit(
                self.on_progress.as_ref(),
                SyncProgress::FallbackUsed {
                    source,
                    kind: "estimate",
                    records: keys,
                },
            );
            return Some(result);
        }

        tracing::warn!(
            source = %source,
            cached = %cached.status,
            estimate = %estimate.status,
            "No fallback data available"
        );
        None
    }
}
