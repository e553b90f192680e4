//! The outbound facade.
//!
//! [`SyncService`] builds every component once, injects them into each
//! other and exposes the operations callers need: queue syncs, read their
//! results, inspect health, and run recovery or fallback by hand.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::entity::marketplace::Marketplace;
use crate::fallback::{CachedDataReport, EstimateReport, FallbackConfig, FallbackManager};
use crate::health::{HealthError, HealthMonitor, HealthReport, HealthThresholds};
use crate::inventory::{DbInventorySink, InventorySink};
use crate::platform::{
    AdaptiveBatcher, BatchSizeConfig, MarketplaceClient, RateLimitSettings, RateLimiter, op_key,
};
use crate::recovery::{
    CleanupReport, FailureRecoveryReport, IntegrityReport, RecoveryConfig, RecoveryManager,
    ResyncReport,
};
use crate::request_cache::{CacheConfig, CacheError, CacheStats, RequestCache};
use crate::resilience::{ErrorClassifier, ErrorType, ResilientClient, RetryPolicy};
use crate::retry::RetryConfig;
use crate::status::OperationStatus;
use crate::sync::{
    ParallelSyncManager, PerformanceMetrics, ProgressCallback, ResourceProbe, SchedulerConfig,
    SourceSyncExecutor, SyncOptions, SyncResult, SystemProbe, TaskId, TaskPriority, TaskStatus,
    run_log,
};

/// Errors raised while wiring or starting the service.
#[derive(Debug, Error)]
pub enum SyncServiceError {
    #[error("No marketplace clients configured")]
    NoClients,

    #[error("Duplicate client for {0}")]
    DuplicateClient(Marketplace),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Health check failed: {0}")]
    Health(#[from] HealthError),
}

pub type Result<T> = std::result::Result<T, SyncServiceError>;

/// Configuration for every component the service builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub rate_limits: RateLimitSettings,
    pub batching: BatchSizeConfig,
    pub scheduler: SchedulerConfig,
    pub health: HealthThresholds,
    pub recovery: RecoveryConfig,
    pub fallback: FallbackConfig,
    /// Backoff for transient database errors while persisting.
    pub persistence_retry: RetryConfig,
}

/// Builder for [`SyncService`].
pub struct SyncServiceBuilder {
    db: DatabaseConnection,
    config: ServiceConfig,
    clients: Vec<Arc<dyn MarketplaceClient>>,
    sink: Option<Arc<dyn InventorySink>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    on_progress: Option<ProgressCallback>,
}

impl SyncServiceBuilder {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            config: ServiceConfig::default(),
            clients: Vec::new(),
            sink: None,
            probe: None,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a marketplace client. At most one per marketplace.
    #[must_use]
    pub fn client(mut self, client: Arc<dyn MarketplaceClient>) -> Self {
        self.clients.push(client);
        self
    }

    /// Replace the default database sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn InventorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the host resource probe.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn progress(mut self, on_progress: ProgressCallback) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn build(self) -> Result<SyncService> {
        if self.clients.is_empty() {
            return Err(SyncServiceError::NoClients);
        }

        let config = self.config;
        let shutdown = Arc::new(AtomicBool::new(false));
        let cache = Arc::new(RequestCache::new(config.cache.clone()));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let classifier = Arc::new(ErrorClassifier::new(config.retry.clone()));
        let batcher = Arc::new(AdaptiveBatcher::new(config.batching));

        let sink = self.sink.unwrap_or_else(|| {
            Arc::new(
                DbInventorySink::new(self.db.clone())
                    .with_retry_config(config.persistence_retry.clone()),
            ) as Arc<dyn InventorySink>
        });
        let fallback = FallbackManager::new(self.db.clone(), config.fallback.clone());

        let mut sources = Vec::with_capacity(self.clients.len());
        let mut executor =
            SourceSyncExecutor::new(self.db.clone(), sink, Arc::clone(&batcher), fallback.clone());
        for client in self.clients {
            let source = client.marketplace();
            if sources.contains(&source) {
                return Err(SyncServiceError::DuplicateClient(source));
            }
            sources.push(source);
            batcher.register(op_key(source, client.task_type()), config.batching);
            executor = executor.with_client(Arc::new(ResilientClient::new(
                client,
                Arc::clone(&cache),
                Arc::clone(&limiter),
                Arc::clone(&classifier),
                Arc::clone(&shutdown),
            )));
        }
        if let Some(cb) = &self.on_progress {
            executor = executor.with_progress(Arc::clone(cb));
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemProbe::new()) as Arc<dyn ResourceProbe>);
        let scheduler = ParallelSyncManager::new(
            config.scheduler.clone(),
            Arc::new(executor),
            Arc::clone(&classifier),
            probe,
            shutdown,
            self.on_progress,
        );

        tracing::debug!(sources = ?sources, "Sync service built");

        Ok(SyncService {
            recovery: RecoveryManager::new(self.db.clone(), config.recovery.clone()),
            health: HealthMonitor::new(self.db.clone(), config.health.clone()),
            db: self.db,
            sources,
            cache,
            classifier,
            batcher,
            fallback,
            scheduler,
        })
    }
}

/// Owns every component and exposes the outbound operations.
pub struct SyncService {
    db: DatabaseConnection,
    sources: Vec<Marketplace>,
    cache: Arc<RequestCache>,
    classifier: Arc<ErrorClassifier>,
    batcher: Arc<AdaptiveBatcher>,
    fallback: FallbackManager,
    recovery: RecoveryManager,
    health: HealthMonitor,
    scheduler: ParallelSyncManager,
}

impl SyncService {
    pub fn builder(db: DatabaseConnection) -> SyncServiceBuilder {
        SyncServiceBuilder::new(db)
    }

    /// Marketplaces this service has clients for.
    pub fn sources(&self) -> &[Marketplace] {
        &self.sources
    }

    /// Sweep runs orphaned by a previous process, load the cache snapshot and
    /// start dispatching. Returns the number of orphaned runs marked failed.
    pub async fn start(&self) -> Result<u64> {
        let orphaned = run_log::sweep_orphaned(&self.db).await?;
        match self.cache.load_snapshot(&self.db).await {
            Ok(loaded) => tracing::debug!(entries = loaded, "Loaded cache snapshot"),
            Err(e) => tracing::warn!(error = %e, "Could not load cache snapshot, starting cold"),
        }
        self.scheduler.start();
        tracing::info!(sources = ?self.sources, orphaned, "Sync service started");
        Ok(orphaned)
    }

    // ─── Scheduling ──────────────────────────────────────────────────────────

    pub fn run_sync(&self, source: Marketplace, priority: TaskPriority) -> TaskId {
        self.run_sync_with(source, priority, SyncOptions::default())
    }

    pub fn run_sync_with(
        &self,
        source: Marketplace,
        priority: TaskPriority,
        options: SyncOptions,
    ) -> TaskId {
        self.scheduler.submit(source, priority, options)
    }

    pub fn get_result(&self, task_id: TaskId) -> TaskStatus {
        self.scheduler.get_result(task_id)
    }

    pub async fn wait_for(&self, task_id: TaskId) -> Option<SyncResult> {
        self.scheduler.wait_for(task_id).await
    }

    pub fn cancel(&self, task_id: TaskId) -> bool {
        self.scheduler.cancel(task_id)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.scheduler.metrics()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Current batch size per operation.
    pub fn batch_sizes(&self) -> BTreeMap<String, usize> {
        self.batcher
            .snapshot()
            .into_iter()
            .map(|(key, config)| (key, config.current_size))
            .collect()
    }

    /// Recent error counts by type for a source.
    pub fn error_summary(&self, source: Marketplace) -> BTreeMap<ErrorType, usize> {
        self.classifier.error_summary(source)
    }

    // ─── Health ──────────────────────────────────────────────────────────────

    pub async fn get_health_report(&self) -> Result<HealthReport> {
        Ok(self.health.get_health_report().await?)
    }

    // ─── Recovery & Fallback ─────────────────────────────────────────────────

    /// Delete the window and queue a high-priority sync to rewrite it.
    pub async fn force_resync(&self, source: Marketplace, days_back: i64) -> ResyncReport {
        let mut report = self.recovery.force_resync(source, days_back).await;
        if report.status != OperationStatus::Error && self.sources.contains(&source) {
            report.task_id = Some(self.run_sync(source, TaskPriority::High));
        }
        report
    }

    pub async fn cleanup_corrupted_data(&self, source: Marketplace, days_back: i64) -> CleanupReport {
        self.recovery.cleanup_corrupted_data(source, days_back).await
    }

    pub async fn validate_data_integrity(&self, source: Marketplace) -> IntegrityReport {
        self.recovery.validate_data_integrity(source).await
    }

    pub async fn recover_from_failure(
        &self,
        source: Marketplace,
        session_id: Option<Uuid>,
    ) -> FailureRecoveryReport {
        self.recovery.recover_from_failure(source, session_id).await
    }

    pub async fn use_fallback_data(&self, source: Marketplace, max_age_hours: i64) -> CachedDataReport {
        self.fallback.use_cached_data(source, max_age_hours).await
    }

    pub async fn estimate_from_history(&self, source: Marketplace, days_back: i64) -> EstimateReport {
        self.fallback
            .estimate_inventory_from_history(source, days_back)
            .await
    }

    /// Stop dispatching, wait for running tasks and persist the cache.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        match self.cache.flush_snapshot(&self.db).await {
            Ok(saved) => tracing::debug!(entries = saved, "Flushed cache snapshot"),
            Err(e) => tracing::warn!(error = %e, "Could not flush cache snapshot"),
        }
        tracing::info!("Sync service stopped");
    }
}
