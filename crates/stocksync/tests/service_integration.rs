//! End-to-end tests: scheduler, executor, sink and run log wired by the
//! sync service against fake marketplaces.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use stocksync::entity::sync_log::RunStatus;
use stocksync::sync::{FixedProbe, SchedulerConfig};
use stocksync::{
    CacheConfig, ErrorType, InventoryRecord, InventoryRecordColumn, Marketplace, OperationStatus, RetryPolicy,
    ServiceConfig, SyncLog, SyncOptions, SyncResult, SyncService, SyncServiceError, SyncStatus,
    TaskId, TaskPriority,
};

use common::{FakeMarketplace, days_ago, insert_records, item, record, setup_test_db, today};

fn fast_config(max_retries: u32) -> ServiceConfig {
    ServiceConfig {
        cache: CacheConfig {
            enabled: false,
            ..Default::default()
        },
        retry: RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
            jitter: false,
            ..Default::default()
        },
        scheduler: SchedulerConfig {
            poll_interval_ms: 10,
            default_max_retries: max_retries,
            shutdown_timeout_secs: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn start(db: &DatabaseConnection, client: Arc<FakeMarketplace>, max_retries: u32) -> SyncService {
    let service = SyncService::builder(db.clone())
        .config(fast_config(max_retries))
        .client(client)
        .probe(Arc::new(FixedProbe::default()))
        .build()
        .expect("service builds");
    service.start().await.expect("service starts");
    service
}

async fn wait(service: &SyncService, task_id: TaskId) -> SyncResult {
    tokio::time::timeout(Duration::from_secs(10), service.wait_for(task_id))
        .await
        .expect("task should finish")
        .expect("task should be known")
}

async fn rows_today(db: &DatabaseConnection, source: Marketplace) -> u64 {
    InventoryRecord::find()
        .filter(InventoryRecordColumn::Source.eq(source))
        .filter(InventoryRecordColumn::SnapshotDate.eq(today()))
        .count(db)
        .await
        .expect("count")
}

#[tokio::test]
async fn test_build_without_clients_fails() {
    let db = setup_test_db().await;
    let result = SyncService::builder(db).build();
    assert!(matches!(result, Err(SyncServiceError::NoClients)));
}

#[tokio::test]
async fn test_sync_persists_every_page() {
    let db = setup_test_db().await;
    let client = Arc::new(FakeMarketplace::with_pages(
        Marketplace::Ozon,
        vec![vec![item("a", 5), item("b", 7)], vec![item("c", 0)]],
    ));
    let service = start(&db, client.clone(), 0).await;

    let task_id = service.run_sync(Marketplace::Ozon, TaskPriority::High);
    let result = wait(&service, task_id).await;

    assert_eq!(result.status, SyncStatus::Success);
    assert_eq!(result.records_processed, 3);
    assert_eq!(result.records_inserted, 3);
    assert_eq!(client.calls(), 2);
    assert_eq!(rows_today(&db, Marketplace::Ozon).await, 3);

    let session_id = result.session_id.expect("run is logged");
    let run = SyncLog::find_by_id(session_id)
        .one(&db)
        .await
        .expect("query")
        .expect("run exists");
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.records_processed, 3);

    let metrics = service.metrics();
    assert_eq!(metrics.tasks_succeeded, 1);
    assert_eq!(metrics.records_processed, 3);

    let health = service.get_health_report().await.expect("health");
    let ozon = health
        .sources
        .iter()
        .find(|m| m.source == Marketplace::Ozon)
        .expect("ozon metrics");
    assert_eq!(ozon.total_records, 3);

    service.shutdown().await;
}

#[tokio::test]
async fn test_resync_of_same_day_updates_rows() {
    let db = setup_test_db().await;
    let client = Arc::new(FakeMarketplace::with_pages(
        Marketplace::Wildberries,
        vec![vec![item("a", 5), item("b", 7)]],
    ));
    let service = start(&db, client, 0).await;

    let first = service.run_sync(Marketplace::Wildberries, TaskPriority::Normal);
    wait(&service, first).await;

    // Forced resync deletes today's rows and queues a fresh sync
    let report = service.force_resync(Marketplace::Wildberries, 0).await;
    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.records_deleted, 2);
    let task_id = report.task_id.expect("resync queues a sync");

    let result = wait(&service, task_id).await;
    assert_eq!(result.status, SyncStatus::Success);
    assert_eq!(rows_today(&db, Marketplace::Wildberries).await, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_failed_sync_falls_back_to_cached_snapshot() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        vec![
            record(Marketplace::Ozon, "a", 10, days_ago(1)),
            record(Marketplace::Ozon, "b", 20, days_ago(1)),
        ],
    )
    .await;
    let client = Arc::new(FakeMarketplace::failing(Marketplace::Ozon, 503));
    let service = start(&db, client, 0).await;

    let task_id = service.run_sync(Marketplace::Ozon, TaskPriority::Normal);
    let result = wait(&service, task_id).await;

    assert_eq!(result.status, SyncStatus::Fallback);
    assert_eq!(result.records_processed, 2);
    assert_eq!(rows_today(&db, Marketplace::Ozon).await, 2);
    assert_eq!(service.metrics().tasks_fallback, 1);

    service.shutdown().await;
}

#[tokio::test]
async fn test_failed_sync_without_fallback_can_be_recovered() {
    let db = setup_test_db().await;
    let client = Arc::new(FakeMarketplace::failing(Marketplace::Ozon, 503));
    let service = start(&db, client, 0).await;

    let options = SyncOptions {
        allow_fallback: false,
        ..Default::default()
    };
    let task_id = service.run_sync_with(Marketplace::Ozon, TaskPriority::Normal, options);
    let result = wait(&service, task_id).await;

    assert_eq!(result.status, SyncStatus::Failed);
    let error = result.error.expect("classified error");
    assert_eq!(error.error_type, ErrorType::ApiUnavailable);
    assert!(
        service
            .error_summary(Marketplace::Ozon)
            .contains_key(&ErrorType::ApiUnavailable)
    );

    let recovery = service.recover_from_failure(Marketplace::Ozon, None).await;
    assert_eq!(recovery.status, OperationStatus::Success);
    assert_eq!(recovery.session_id, result.session_id);
    assert_eq!(recovery.records_removed, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_retryable_failures_are_requeued() {
    let db = setup_test_db().await;
    let client = Arc::new(FakeMarketplace::failing(Marketplace::Wildberries, 503));
    let service = start(&db, client.clone(), 2).await;

    let options = SyncOptions {
        allow_fallback: false,
        ..Default::default()
    };
    let task_id = service.run_sync_with(Marketplace::Wildberries, TaskPriority::Normal, options);
    let result = wait(&service, task_id).await;

    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(client.calls(), 3);
    assert_eq!(service.metrics().tasks_retried, 2);

    service.shutdown().await;
}

#[tokio::test]
async fn test_auth_failures_are_not_retried() {
    let db = setup_test_db().await;
    let client = Arc::new(FakeMarketplace::failing(Marketplace::Ozon, 401));
    let service = start(&db, client.clone(), 3).await;

    let options = SyncOptions {
        allow_fallback: false,
        ..Default::default()
    };
    let task_id = service.run_sync_with(Marketplace::Ozon, TaskPriority::Normal, options);
    let result = wait(&service, task_id).await;

    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(client.calls(), 1);
    assert_eq!(service.metrics().tasks_retried, 0);

    service.shutdown().await;
}

fn without_fallback() -> SyncOptions {
    SyncOptions {
        allow_fallback: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failure_after_first_page_is_retried_and_recoverable() {
    let db = setup_test_db().await;
    let client = Arc::new(FakeMarketplace::breaking_after(
        Marketplace::Ozon,
        vec![vec![item("a", 5), item("b", 7)]],
        503,
    ));
    let service = start(&db, client.clone(), 2).await;

    let task_id = service.run_sync_with(Marketplace::Ozon, TaskPriority::Normal, without_fallback());
    let result = wait(&service, task_id).await;

    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(
        result.error.as_ref().map(|e| e.error_type),
        Some(ErrorType::ApiUnavailable)
    );
    assert_eq!(service.metrics().tasks_retried, 2);
    assert_eq!(client.calls(), 6);
    assert_eq!(rows_today(&db, Marketplace::Ozon).await, 2);

    // Every attempt failed, so the rows the last one rewrote all go
    let recovery = service.recover_from_failure(Marketplace::Ozon, None).await;
    assert_eq!(recovery.status, OperationStatus::Success);
    assert_eq!(recovery.session_id, result.session_id);
    assert_eq!(recovery.records_removed, 2);
    assert_eq!(rows_today(&db, Marketplace::Ozon).await, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_recovery_keeps_rows_an_earlier_run_inserted() {
    let db = setup_test_db().await;

    let good = Arc::new(FakeMarketplace::with_pages(
        Marketplace::Ozon,
        vec![vec![item("a", 5), item("b", 7)]],
    ));
    let service = start(&db, good, 0).await;
    let task_id = service.run_sync(Marketplace::Ozon, TaskPriority::Normal);
    assert_eq!(wait(&service, task_id).await.status, SyncStatus::Success);
    service.shutdown().await;

    let broken = Arc::new(FakeMarketplace::breaking_after(
        Marketplace::Ozon,
        vec![vec![item("a", 1), item("c", 3)]],
        503,
    ));
    let service = start(&db, broken, 0).await;
    let task_id = service.run_sync_with(Marketplace::Ozon, TaskPriority::Normal, without_fallback());
    let result = wait(&service, task_id).await;
    assert_eq!(result.status, SyncStatus::Failed);
    assert_eq!(result.records_updated, 1);
    assert_eq!(result.records_inserted, 1);

    let recovery = service.recover_from_failure(Marketplace::Ozon, None).await;
    assert_eq!(recovery.status, OperationStatus::Success);
    assert_eq!(recovery.records_removed, 1);

    let remaining = InventoryRecord::find()
        .filter(InventoryRecordColumn::Source.eq(Marketplace::Ozon))
        .filter(InventoryRecordColumn::SnapshotDate.eq(today()))
        .all(&db)
        .await
        .expect("rows");
    let mut products: Vec<_> = remaining
        .iter()
        .filter_map(|r| r.product_id.as_deref())
        .collect();
    products.sort_unstable();
    assert_eq!(products, vec!["a", "b"]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_failure_after_first_page_falls_back_to_previous_snapshot() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        vec![
            record(Marketplace::Ozon, "x", 10, days_ago(1)),
            record(Marketplace::Ozon, "y", 20, days_ago(1)),
        ],
    )
    .await;
    let client = Arc::new(FakeMarketplace::breaking_after(
        Marketplace::Ozon,
        vec![vec![item("a", 1)]],
        503,
    ));
    let service = start(&db, client, 0).await;

    let task_id = service.run_sync(Marketplace::Ozon, TaskPriority::Normal);
    let result = wait(&service, task_id).await;

    // The partial page is dropped and yesterday's snapshot copied instead
    assert_eq!(result.status, SyncStatus::Fallback);
    assert_eq!(result.records_processed, 2);
    let today_rows = InventoryRecord::find()
        .filter(InventoryRecordColumn::Source.eq(Marketplace::Ozon))
        .filter(InventoryRecordColumn::SnapshotDate.eq(today()))
        .all(&db)
        .await
        .expect("rows");
    assert_eq!(today_rows.len(), 2);
    assert!(today_rows.iter().all(|r| r.product_id.as_deref() != Some("a")));

    let recovery = service.recover_from_failure(Marketplace::Ozon, None).await;
    assert_eq!(recovery.status, OperationStatus::NoAction);

    service.shutdown().await;
}
