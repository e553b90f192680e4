//! Integration tests for the health monitor.

#![cfg(all(feature = "sqlite", feature = "migrate"))]

mod common;

use chrono::{Duration, Utc};
use stocksync::health::AnomalyType;
use stocksync::{HealthMonitor, HealthStatus, HealthThresholds, Marketplace, SyncStatus};

use common::{days_ago, insert_records, record, record_run, setup_test_db, today};

fn source_status(report: &stocksync::HealthReport, source: Marketplace) -> HealthStatus {
    report
        .sources
        .iter()
        .find(|m| m.source == source)
        .map(|m| m.status)
        .expect("source is reported")
}

#[tokio::test]
async fn test_empty_database_is_unknown() {
    let db = setup_test_db().await;
    let monitor = HealthMonitor::new(db, HealthThresholds::default());

    let report = monitor.get_health_report().await.expect("report");

    assert_eq!(report.overall_status, HealthStatus::Unknown);
    assert_eq!(report.sources.len(), 2);
    assert!(report.sources.iter().all(|m| m.status == HealthStatus::Unknown));
    assert!(report.anomalies.is_empty());
}

#[tokio::test]
async fn test_recent_successful_sync_is_healthy() {
    let db = setup_test_db().await;
    record_run(
        &db,
        Marketplace::Ozon,
        SyncStatus::Success,
        Utc::now() - Duration::hours(1),
    )
    .await;
    insert_records(
        &db,
        (0..10)
            .map(|i| record(Marketplace::Ozon, &format!("p{i}"), 10 + i, today()))
            .collect(),
    )
    .await;
    let monitor = HealthMonitor::new(db, HealthThresholds::default());

    let report = monitor.get_health_report().await.expect("report");

    assert_eq!(source_status(&report, Marketplace::Ozon), HealthStatus::Healthy);
    assert_eq!(
        source_status(&report, Marketplace::Wildberries),
        HealthStatus::Unknown
    );
    assert_eq!(report.overall_status, HealthStatus::Healthy);
    assert!(report.anomalies.is_empty());

    let ozon = report
        .sources
        .iter()
        .find(|m| m.source == Marketplace::Ozon)
        .expect("ozon metrics");
    assert_eq!(ozon.total_records, 10);
    assert_eq!(ozon.success_rate_24h, Some(100.0));
    assert_eq!(ozon.latest_snapshot_date, Some(today()));
    assert_eq!(report.metrics.total_records, 10);
}

#[tokio::test]
async fn test_corrupted_latest_snapshot_raises_anomalies() {
    let db = setup_test_db().await;
    record_run(&db, Marketplace::Wildberries, SyncStatus::Success, Utc::now()).await;

    let mut rows: Vec<_> = (0..10)
        .map(|i| record(Marketplace::Wildberries, &format!("p{i}"), 20, days_ago(1)))
        .collect();
    // Today: 4 rows, half of them zero and one negative
    rows.push(record(Marketplace::Wildberries, "p0", 0, today()));
    rows.push(record(Marketplace::Wildberries, "p1", 0, today()));
    rows.push(record(Marketplace::Wildberries, "p2", -4, today()));
    rows.push(record(Marketplace::Wildberries, "p3", 20, today()));
    insert_records(&db, rows).await;

    let monitor = HealthMonitor::new(db, HealthThresholds::default());
    let report = monitor.get_health_report().await.expect("report");

    let kinds: Vec<AnomalyType> = report.anomalies.iter().map(|a| a.anomaly_type).collect();
    assert!(kinds.contains(&AnomalyType::ZeroStock));
    assert!(kinds.contains(&AnomalyType::NegativeStock));
    assert!(kinds.contains(&AnomalyType::RecordCountDrop));
    assert!(report.anomalies.iter().all(|a| a.source == Marketplace::Wildberries));
    assert_eq!(report.overall_status, HealthStatus::Critical);
    assert!(
        report
            .recommendations
            .iter()
            .any(|r| r.contains("recover cleanup"))
    );
}

#[tokio::test]
async fn test_failed_runs_raise_error_spike() {
    let db = setup_test_db().await;
    for i in 0..5 {
        record_run(
            &db,
            Marketplace::Ozon,
            SyncStatus::Failed,
            Utc::now() - Duration::minutes(10 * i),
        )
        .await;
    }
    let monitor = HealthMonitor::new(db, HealthThresholds::default());

    let report = monitor.get_health_report().await.expect("report");

    let ozon = report
        .sources
        .iter()
        .find(|m| m.source == Marketplace::Ozon)
        .expect("ozon metrics");
    assert_eq!(ozon.error_count_24h, 5);
    assert_eq!(ozon.success_rate_24h, Some(0.0));
    assert_eq!(ozon.status, HealthStatus::Critical);
    assert!(
        report
            .anomalies
            .iter()
            .any(|a| a.anomaly_type == AnomalyType::ErrorSpike)
    );
}

#[tokio::test]
async fn test_monitor_limited_to_configured_sources() {
    let db = setup_test_db().await;
    let monitor = HealthMonitor::new(db, HealthThresholds::default())
        .with_sources(vec![Marketplace::Wildberries]);

    let metrics = monitor
        .source_metrics(Marketplace::Wildberries)
        .await
        .expect("metrics");
    assert_eq!(metrics.status, HealthStatus::Unknown);

    let report = monitor.get_health_report().await.expect("report");
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].source, Marketplace::Wildberries);
}
