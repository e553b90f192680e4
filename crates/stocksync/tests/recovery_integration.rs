//! Integration tests for the recovery manager.
//!
//! These tests require the `sqlite` and `migrate` features to be enabled
//! and use an in-memory SQLite database.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use stocksync::entity::sync_log::RunStatus;
use stocksync::{
    DbInventorySink, InventoryRecord, InventoryRecordColumn, InventorySink, Marketplace,
    OperationStatus, RecoveryConfig, RecoveryManager, StockRecord, SyncLog, SyncStatus,
};
use uuid::Uuid;

use common::{days_ago, insert_records, record, record_run, setup_test_db, today};

/// 65 clean rows, 30 negative rows and 5 duplicates of clean rows.
async fn seed_corrupted(db: &sea_orm::DatabaseConnection) {
    let mut rows = Vec::new();
    for i in 0..65 {
        rows.push(record(Marketplace::Ozon, &format!("p{i}"), 5, today()));
    }
    for i in 0..30 {
        rows.push(record(Marketplace::Ozon, &format!("n{i}"), -1, today()));
    }
    for i in 0..5 {
        let mut dup = record(Marketplace::Ozon, &format!("p{i}"), 4, today());
        dup.synced_at = Set((Utc::now() - Duration::hours(1)).fixed_offset());
        rows.push(dup);
    }
    insert_records(db, rows).await;
}

async fn count(db: &sea_orm::DatabaseConnection, source: Marketplace) -> u64 {
    InventoryRecord::find()
        .filter(InventoryRecordColumn::Source.eq(source))
        .count(db)
        .await
        .expect("count")
}

// ─── validate_data_integrity ─────────────────────────────────────────────────

#[tokio::test]
async fn test_validate_scores_negative_and_duplicate_rows() {
    let db = setup_test_db().await;
    seed_corrupted(&db).await;
    let manager = RecoveryManager::new(db, RecoveryConfig::default());

    let report = manager.validate_data_integrity(Marketplace::Ozon).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.total_records, 100);
    assert_eq!(report.issues.negative_values, 30);
    assert_eq!(report.issues.duplicates, 5);
    assert!((report.integrity_score - 65.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_validate_empty_source_scores_full() {
    let db = setup_test_db().await;
    let manager = RecoveryManager::new(db, RecoveryConfig::default());

    let report = manager.validate_data_integrity(Marketplace::Wildberries).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.total_records, 0);
    assert_eq!(report.integrity_score, 100.0);
}

#[tokio::test]
async fn test_rows_written_by_the_sink_score_full() {
    let db = setup_test_db().await;
    let sink = DbInventorySink::new(db.clone());
    let records: Vec<StockRecord> = (0..20)
        .map(|i| StockRecord {
            product_id: Some(format!("p{i}")),
            sku: format!("SKU-{i}"),
            warehouse_id: Some(format!("wh{}", i % 3)),
            stock_type: if i % 2 == 0 { "fbo" } else { "fbs" }.to_string(),
            quantity: i,
            reserved: 0,
            snapshot_date: today(),
        })
        .collect();

    let session_id = Uuid::new_v4();
    let outcome = sink
        .persist_batch(&records, Marketplace::Ozon, session_id)
        .await
        .expect("persist");
    assert_eq!(outcome.inserted, 20);
    // Writing the same snapshot again updates in place
    sink.persist_batch(&records, Marketplace::Ozon, Uuid::new_v4())
        .await
        .expect("persist again");

    let manager = RecoveryManager::new(db, RecoveryConfig::default());
    let report = manager.validate_data_integrity(Marketplace::Ozon).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.total_records, 20);
    assert_eq!(report.integrity_score, 100.0);
    assert_eq!(report.issues.negative_values, 0);
    assert_eq!(report.issues.null_keys, 0);
    assert_eq!(report.issues.empty_identifiers, 0);
    assert_eq!(report.issues.future_dates, 0);
    assert_eq!(report.issues.stale_snapshots, 0);
    assert_eq!(report.issues.duplicates, 0);
}

// ─── cleanup_corrupted_data ──────────────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_removes_corruption_and_keeps_latest_duplicate() {
    let db = setup_test_db().await;
    seed_corrupted(&db).await;
    let manager = RecoveryManager::new(db.clone(), RecoveryConfig::default());

    let report = manager.cleanup_corrupted_data(Marketplace::Ozon, 7).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.removed.negative_values, 30);
    assert_eq!(report.removed.duplicates, 5);
    assert_eq!(report.total_removed, 35);
    assert_eq!(count(&db, Marketplace::Ozon).await, 65);

    // The most recently synced copy of each duplicated key survives
    let survivors = InventoryRecord::find()
        .filter(InventoryRecordColumn::ProductId.eq("p0"))
        .all(&db)
        .await
        .expect("query");
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].quantity, 5);

    let after = manager.validate_data_integrity(Marketplace::Ozon).await;
    assert_eq!(after.integrity_score, 100.0);
}

#[tokio::test]
async fn test_cleanup_removes_stale_snapshots_outside_window() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        vec![
            record(Marketplace::Ozon, "old", 3, days_ago(200)),
            record(Marketplace::Ozon, "recent", 3, days_ago(10)),
            record(Marketplace::Ozon, "fresh", 3, today()),
        ],
    )
    .await;
    let manager = RecoveryManager::new(db.clone(), RecoveryConfig::default());

    let report = manager.cleanup_corrupted_data(Marketplace::Ozon, 7).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.removed.stale_snapshots, 1);
    assert_eq!(report.total_removed, 1);
    assert_eq!(count(&db, Marketplace::Ozon).await, 2);
}

#[tokio::test]
async fn test_cleanup_clean_data_is_no_action() {
    let db = setup_test_db().await;
    insert_records(&db, vec![record(Marketplace::Ozon, "p", 1, today())]).await;
    let manager = RecoveryManager::new(db, RecoveryConfig::default());

    let report = manager.cleanup_corrupted_data(Marketplace::Ozon, 30).await;

    assert_eq!(report.status, OperationStatus::NoAction);
    assert_eq!(report.total_removed, 0);
}

#[tokio::test]
async fn test_cleanup_with_huge_window_does_not_overflow() {
    let db = setup_test_db().await;
    seed_corrupted(&db).await;
    let manager = RecoveryManager::new(db.clone(), RecoveryConfig::default());

    let report = manager.cleanup_corrupted_data(Marketplace::Ozon, 200_000_000).await;
    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.total_removed, 35);

    let report = manager.cleanup_corrupted_data(Marketplace::Ozon, i64::MAX).await;
    assert_eq!(report.status, OperationStatus::NoAction);
}

// ─── force_resync ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_force_resync_deletes_only_the_window() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        vec![
            record(Marketplace::Wildberries, "a", 1, today()),
            record(Marketplace::Wildberries, "b", 1, days_ago(1)),
            record(Marketplace::Wildberries, "c", 1, days_ago(10)),
            record(Marketplace::Ozon, "a", 1, today()),
        ],
    )
    .await;
    let manager = RecoveryManager::new(db.clone(), RecoveryConfig::default());

    let report = manager.force_resync(Marketplace::Wildberries, 3).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.records_deleted, 2);
    assert!(report.task_id.is_none());
    assert_eq!(count(&db, Marketplace::Wildberries).await, 1);
    assert_eq!(count(&db, Marketplace::Ozon).await, 1);
}

#[tokio::test]
async fn test_force_resync_empty_window_is_no_action() {
    let db = setup_test_db().await;
    let manager = RecoveryManager::new(db, RecoveryConfig::default());

    let report = manager.force_resync(Marketplace::Ozon, 7).await;

    assert_eq!(report.status, OperationStatus::NoAction);
    assert_eq!(report.records_deleted, 0);
}

#[tokio::test]
async fn test_force_resync_with_huge_window_clears_all_history() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        vec![
            record(Marketplace::Ozon, "a", 1, today()),
            record(Marketplace::Ozon, "b", 1, days_ago(400)),
        ],
    )
    .await;
    let manager = RecoveryManager::new(db.clone(), RecoveryConfig::default());

    let report = manager.force_resync(Marketplace::Ozon, i64::MAX).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.records_deleted, 2);
    assert_eq!(count(&db, Marketplace::Ozon).await, 0);
}

// ─── recover_from_failure ────────────────────────────────────────────────────

#[tokio::test]
async fn test_recover_without_failed_run_is_no_action() {
    let db = setup_test_db().await;
    record_run(&db, Marketplace::Ozon, SyncStatus::Success, Utc::now()).await;
    let manager = RecoveryManager::new(db, RecoveryConfig::default());

    let report = manager.recover_from_failure(Marketplace::Ozon, None).await;

    assert_eq!(report.status, OperationStatus::NoAction);
    assert_eq!(report.records_removed, 0);
    assert!(report.session_id.is_none());
}

#[tokio::test]
async fn test_recover_removes_rows_of_failed_session_once() {
    let db = setup_test_db().await;
    let failed = record_run(&db, Marketplace::Ozon, SyncStatus::Failed, Utc::now()).await;

    let mut partial = vec![
        record(Marketplace::Ozon, "a", 1, today()),
        record(Marketplace::Ozon, "b", 1, today()),
    ];
    for row in &mut partial {
        row.sync_session_id = Set(Some(failed));
        row.created_session_id = Set(Some(failed));
    }
    partial.push(record(Marketplace::Ozon, "kept", 1, days_ago(1)));
    insert_records(&db, partial).await;

    let manager = RecoveryManager::new(db.clone(), RecoveryConfig::default());
    let report = manager.recover_from_failure(Marketplace::Ozon, None).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.session_id, Some(failed));
    assert_eq!(report.records_removed, 2);
    assert!(report.failed_run_started_at.is_some());
    assert_eq!(count(&db, Marketplace::Ozon).await, 1);

    let run = SyncLog::find_by_id(failed)
        .one(&db)
        .await
        .expect("query")
        .expect("run exists");
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.recovered_at.is_some());

    let again = manager.recover_from_failure(Marketplace::Ozon, None).await;
    assert_eq!(again.status, OperationStatus::NoAction);
}

#[tokio::test]
async fn test_recover_rejects_session_from_other_source() {
    let db = setup_test_db().await;
    let failed = record_run(&db, Marketplace::Wildberries, SyncStatus::Failed, Utc::now()).await;
    let manager = RecoveryManager::new(db, RecoveryConfig::default());

    let report = manager
        .recover_from_failure(Marketplace::Ozon, Some(failed))
        .await;

    assert_eq!(report.status, OperationStatus::NoAction);
}
