//! Integration tests for cached and estimated fallback data.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use stocksync::entity::sync_log::RunStatus;
use stocksync::{
    FallbackConfig, FallbackManager, InventoryRecord, InventoryRecordColumn, Marketplace,
    OperationStatus, SyncLog,
};

use common::{days_ago, insert_records, record, setup_test_db, today};

// ─── use_cached_data ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cached_data_copies_latest_fresh_snapshot_to_today() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        vec![
            record(Marketplace::Ozon, "a", 10, days_ago(1)),
            record(Marketplace::Ozon, "b", 20, days_ago(1)),
            // Corrupted rows are not carried forward
            record(Marketplace::Ozon, "c", -3, days_ago(1)),
            record(Marketplace::Ozon, "old", 5, days_ago(2)),
        ],
    )
    .await;
    let manager = FallbackManager::new(db.clone(), FallbackConfig::default());

    let report = manager.use_cached_data(Marketplace::Ozon, 48).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.copied_from, Some(days_ago(1)));
    assert_eq!(report.records_copied, 2);
    let session_id = report.session_id.expect("fallback session");

    let copied = InventoryRecord::find()
        .filter(InventoryRecordColumn::SnapshotDate.eq(today()))
        .all(&db)
        .await
        .expect("query");
    assert_eq!(copied.len(), 2);
    assert!(copied.iter().all(|r| r.sync_session_id == Some(session_id)));
    assert_eq!(copied.iter().map(|r| r.quantity).sum::<i64>(), 30);

    let run = SyncLog::find_by_id(session_id)
        .one(&db)
        .await
        .expect("query")
        .expect("fallback run is logged");
    assert_eq!(run.status, RunStatus::Fallback);
    assert_eq!(run.records_inserted, 2);

    // Today's snapshot now exists
    let again = manager.use_cached_data(Marketplace::Ozon, 48).await;
    assert_eq!(again.status, OperationStatus::NoAction);
}

#[tokio::test]
async fn test_cached_data_ignores_snapshots_synced_too_long_ago() {
    let db = setup_test_db().await;
    let mut stale = record(Marketplace::Wildberries, "a", 10, days_ago(3));
    stale.synced_at = Set((Utc::now() - Duration::hours(72)).fixed_offset());
    insert_records(&db, vec![stale]).await;
    let manager = FallbackManager::new(db, FallbackConfig::default());

    let report = manager.use_cached_data(Marketplace::Wildberries, 48).await;

    assert_eq!(report.status, OperationStatus::NoCache);
    assert_eq!(report.records_copied, 0);
    assert!(report.session_id.is_none());
}

#[tokio::test]
async fn test_cached_data_without_any_data_is_no_cache() {
    let db = setup_test_db().await;
    let manager = FallbackManager::new(db, FallbackConfig::default());

    let report = manager.use_cached_data(Marketplace::Ozon, 48).await;

    assert_eq!(report.status, OperationStatus::NoCache);
}

#[tokio::test]
async fn test_cached_data_with_huge_max_age_does_not_overflow() {
    let db = setup_test_db().await;
    insert_records(&db, vec![record(Marketplace::Ozon, "a", 10, days_ago(1))]).await;
    let manager = FallbackManager::new(db, FallbackConfig::default());

    let report = manager.use_cached_data(Marketplace::Ozon, i64::MAX).await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.records_copied, 1);
}

// ─── estimate_inventory_from_history ─────────────────────────────────────────

#[tokio::test]
async fn test_estimate_requires_minimum_history() {
    let db = setup_test_db().await;
    insert_records(
        &db,
        (1..=5)
            .map(|d| record(Marketplace::Ozon, "a", 10, days_ago(d)))
            .collect(),
    )
    .await;
    let manager = FallbackManager::new(db, FallbackConfig::default());

    let report = manager
        .estimate_inventory_from_history(Marketplace::Ozon, 30)
        .await;

    assert_eq!(report.status, OperationStatus::NoData);
    assert_eq!(report.data_points, 5);
    assert!(report.estimates.is_empty());
}

#[tokio::test]
async fn test_estimate_averages_each_key() {
    let db = setup_test_db().await;
    let mut rows = Vec::new();
    for (d, qty) in [(1, 10), (2, 12), (3, 14), (4, 16)] {
        rows.push(record(Marketplace::Ozon, "a", qty, days_ago(d)));
        rows.push(record(Marketplace::Ozon, "b", 5, days_ago(d)));
        rows.push(record(Marketplace::Ozon, "c", 0, days_ago(d)));
    }
    // Outside the window
    rows.push(record(Marketplace::Ozon, "a", 1_000, days_ago(60)));
    insert_records(&db, rows).await;
    let manager = FallbackManager::new(db.clone(), FallbackConfig::default());

    let report = manager
        .estimate_inventory_from_history(Marketplace::Ozon, 30)
        .await;

    assert_eq!(report.status, OperationStatus::Success);
    assert_eq!(report.data_points, 12);
    assert_eq!(report.estimates.len(), 3);

    let a = report
        .estimates
        .iter()
        .find(|e| e.product_id.as_deref() == Some("a"))
        .expect("estimate for a");
    assert_eq!(a.samples, 4);
    assert!((a.mean - 13.0).abs() < 1e-9);
    assert!(a.std_dev > 0.0);

    let b = report
        .estimates
        .iter()
        .find(|e| e.product_id.as_deref() == Some("b"))
        .expect("estimate for b");
    assert_eq!(b.estimated_quantity, 5);
    assert_eq!(b.std_dev, 0.0);

    // Estimates are not written back
    let today_rows = InventoryRecord::find()
        .filter(InventoryRecordColumn::SnapshotDate.eq(today()))
        .all(&db)
        .await
        .expect("query");
    assert!(today_rows.is_empty());
}

#[tokio::test]
async fn test_estimate_with_huge_window_does_not_overflow() {
    let db = setup_test_db().await;
    insert_records(&db, vec![record(Marketplace::Ozon, "a", 10, days_ago(500))]).await;
    let manager = FallbackManager::new(db, FallbackConfig::default());

    let report = manager
        .estimate_inventory_from_history(Marketplace::Ozon, 200_000_000)
        .await;

    assert_eq!(report.status, OperationStatus::NoData);
    assert_eq!(report.data_points, 1);
}
