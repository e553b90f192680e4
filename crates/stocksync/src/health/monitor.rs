use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};
use thiserror::Error;

use crate::entity::inventory_record::{Column, Entity as InventoryRecord, Model};
use crate::entity::marketplace::Marketplace;
use crate::entity::sync_log::{Model as RunModel, RunStatus};
use crate::inventory::{self, InventoryError};
use crate::sync::run_log;

use super::detectors::{AnomalyDetector, DetectionInput, default_detectors};
use super::types::{
    AggregateMetrics, Anomaly, HealthReport, HealthStatus, HealthThresholds, Severity,
    SyncMetrics,
};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Everything the health pass reads for one source.
struct SourceState {
    metrics: SyncMetrics,
    latest_date: Option<NaiveDate>,
    latest: Vec<Model>,
    previous_date: Option<NaiveDate>,
    previous: Vec<Model>,
}

/// Builds [`HealthReport`]s from persisted state.
pub struct HealthMonitor {
    db: DatabaseConnection,
    thresholds: HealthThresholds,
    detectors: Vec<Box<dyn AnomalyDetector>>,
    sources: Vec<Marketplace>,
}

impl HealthMonitor {
    /// Monitor every marketplace with the built-in detectors.
    pub fn new(db: DatabaseConnection, thresholds: HealthThresholds) -> Self {
        Self {
            db,
            thresholds,
            detectors: default_detectors(),
            sources: Marketplace::ALL.to_vec(),
        }
    }

    #[must_use]
    pub fn with_sources(mut self, sources: Vec<Marketplace>) -> Self {
        self.sources = sources;
        self
    }

    /// Replace the detector set.
    #[must_use]
    pub fn with_detectors(mut self, detectors: Vec<Box<dyn AnomalyDetector>>) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub async fn get_health_report(&self) -> Result<HealthReport, HealthError> {
        let now = Utc::now();
        let mut sources = Vec::with_capacity(self.sources.len());
        let mut anomalies: Vec<Anomaly> = Vec::new();

        for &source in &self.sources {
            let state = self.load_source(source, now).await?;
            let input = DetectionInput {
                source,
                now,
                latest_date: state.latest_date,
                latest: &state.latest,
                previous_date: state.previous_date,
                previous: &state.previous,
                failed_runs_24h: state.metrics.error_count_24h,
            };
            for detector in &self.detectors {
                let found = detector.detect(&input, &self.thresholds);
                if !found.is_empty() {
                    tracing::debug!(
                        source = %source,
                        detector = detector.name(),
                        count = found.len(),
                        "Anomalies detected"
                    );
                }
                anomalies.extend(found);
            }
            sources.push(state.metrics);
        }

        let overall_status = overall_status(&sources, &anomalies);
        let recommendations = recommendations(&sources, &anomalies, &self.thresholds);
        let metrics = aggregate(&sources, &anomalies);

        tracing::info!(
            status = %overall_status,
            anomalies = anomalies.len(),
            "Health report generated"
        );

        Ok(HealthReport {
            overall_status,
            generated_at: now,
            sources,
            anomalies,
            recommendations,
            metrics,
        })
    }

    /// Metrics for a single source without running detectors.
    pub async fn source_metrics(&self, source: Marketplace) -> Result<SyncMetrics, HealthError> {
        let since = Utc::now() - Duration::hours(24);
        let runs = run_log::runs_since(&self.db, source, since).await?;
        self.build_metrics(source, &runs, Utc::now()).await
    }

    async fn load_source(
        &self,
        source: Marketplace,
        now: DateTime<Utc>,
    ) -> Result<SourceState, HealthError> {
        let runs = run_log::runs_since(&self.db, source, now - Duration::hours(24)).await?;
        let metrics = self.build_metrics(source, &runs, now).await?;

        let dates: Vec<NaiveDate> = InventoryRecord::find()
            .select_only()
            .column(Column::SnapshotDate)
            .distinct()
            .filter(Column::Source.eq(source))
            .filter(Column::SnapshotDate.lte(now.date_naive()))
            .order_by_desc(Column::SnapshotDate)
            .limit(2)
            .into_tuple()
            .all(&self.db)
            .await?;
        let latest_date = dates.first().copied();
        let previous_date = dates.get(1).copied();

        let latest = match latest_date {
            Some(date) => inventory::find_by_date(&self.db, source, date).await?,
            None => Vec::new(),
        };
        let previous = match previous_date {
            Some(date) => inventory::find_by_date(&self.db, source, date).await?,
            None => Vec::new(),
        };

        Ok(SourceState {
            metrics: SyncMetrics {
                latest_snapshot_date: latest_date,
                ..metrics
            },
            latest_date,
            latest,
            previous_date,
            previous,
        })
    }

    async fn build_metrics(
        &self,
        source: Marketplace,
        runs_24h: &[RunModel],
        now: DateTime<Utc>,
    ) -> Result<SyncMetrics, HealthError> {
        let total_records = inventory::count_by_source(&self.db, source).await?;
        let has_runs = run_log::has_runs(&self.db, source).await?;
        let last_success = run_log::last_success(&self.db, source).await?;

        let finished: Vec<&RunModel> = runs_24h
            .iter()
            .filter(|r| r.status != RunStatus::Running)
            .collect();
        let succeeded = finished
            .iter()
            .filter(|r| r.status == RunStatus::Success)
            .count();
        let error_count = finished
            .iter()
            .filter(|r| r.status == RunStatus::Failed)
            .count() as u64;
        let success_rate =
            (!finished.is_empty()).then(|| succeeded as f64 / finished.len() as f64 * 100.0);

        let durations: Vec<i64> = finished.iter().filter_map(|r| r.duration_ms).collect();
        let average_duration_ms = (!durations.is_empty())
            .then(|| durations.iter().sum::<i64>() as f64 / durations.len() as f64);

        let last_success_at = last_success
            .as_ref()
            .map(|r| r.completed_at.unwrap_or(r.started_at).with_timezone(&Utc));
        let hours_since_last_success =
            last_success_at.map(|t| (now - t).num_minutes().max(0) as f64 / 60.0);

        let status = if has_runs {
            self.thresholds
                .freshness_status(hours_since_last_success)
                .worst(self.thresholds.success_rate_status(success_rate))
        } else {
            HealthStatus::Unknown
        };

        Ok(SyncMetrics {
            source,
            status,
            runs_24h: runs_24h.len() as u64,
            success_rate_24h: success_rate,
            average_duration_ms,
            error_count_24h: error_count,
            last_success_at,
            hours_since_last_success,
            total_records,
            latest_snapshot_date: None,
        })
    }
}

fn overall_status(sources: &[SyncMetrics], anomalies: &[Anomaly]) -> HealthStatus {
    if !sources.iter().any(SyncMetrics::has_data) {
        return HealthStatus::Unknown;
    }
    let any_source = |status: HealthStatus| sources.iter().any(|s| s.status == status);

    if any_source(HealthStatus::Critical)
        || anomalies.iter().any(|a| a.severity == Severity::Critical)
    {
        HealthStatus::Critical
    } else if any_source(HealthStatus::Warning)
        || anomalies
            .iter()
            .any(|a| matches!(a.severity, Severity::Medium | Severity::High))
    {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

fn recommendations(
    sources: &[SyncMetrics],
    anomalies: &[Anomaly],
    thresholds: &HealthThresholds,
) -> Vec<String> {
    let mut out = Vec::new();

    for metrics in sources {
        let source = metrics.source;
        match metrics.status {
            HealthStatus::Unknown => {
                out.push(format!("{source}: no sync has run yet; schedule an initial sync"));
            }
            HealthStatus::Warning | HealthStatus::Critical => {
                match metrics.hours_since_last_success {
                    None => out.push(format!(
                        "{source}: no successful sync on record; check credentials and connectivity"
                    )),
                    Some(h) if h > thresholds.freshness_warning_hours => out.push(format!(
                        "{source}: last successful sync was {h:.1}h ago; trigger a sync"
                    )),
                    Some(_) => {}
                }
                if let Some(rate) = metrics.success_rate_24h
                    && rate < thresholds.success_rate_warning
                {
                    out.push(format!(
                        "{source}: only {rate:.0}% of runs succeeded in the last 24h; review recent errors"
                    ));
                }
            }
            HealthStatus::Healthy => {}
        }
    }

    let mut by_type = BTreeMap::new();
    for anomaly in anomalies {
        by_type
            .entry(anomaly.anomaly_type)
            .or_insert_with(Vec::new)
            .push(anomaly.source.to_string());
    }
    for (anomaly_type, mut affected) in by_type {
        affected.dedup();
        out.push(format!(
            "{} ({})",
            anomaly_type.recommendation(),
            affected.join(", ")
        ));
    }

    out
}

fn aggregate(sources: &[SyncMetrics], anomalies: &[Anomaly]) -> AggregateMetrics {
    let mut anomalies_by_severity: BTreeMap<Severity, usize> =
        Severity::ALL.iter().map(|&s| (s, 0)).collect();
    for anomaly in anomalies {
        *anomalies_by_severity.entry(anomaly.severity).or_default() += 1;
    }

    let rates: Vec<f64> = sources.iter().filter_map(|s| s.success_rate_24h).collect();
    let average_success_rate =
        (!rates.is_empty()).then(|| rates.iter().sum::<f64>() / rates.len() as f64);

    AggregateMetrics {
        total_records: sources.iter().map(|s| s.total_records).sum(),
        total_anomalies: anomalies.len(),
        anomalies_by_severity,
        average_success_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::types::AnomalyType;

    fn metrics(source: Marketplace, status: HealthStatus) -> SyncMetrics {
        SyncMetrics {
            source,
            status,
            runs_24h: 1,
            success_rate_24h: Some(100.0),
            average_duration_ms: Some(1000.0),
            error_count_24h: 0,
            last_success_at: Some(Utc::now()),
            hours_since_last_success: Some(0.5),
            total_records: 10,
            latest_snapshot_date: None,
        }
    }

    fn anomaly(severity: Severity) -> Anomaly {
        Anomaly {
            anomaly_type: AnomalyType::DuplicateKeys,
            severity,
            source: Marketplace::Ozon,
            description: "dups".to_string(),
            affected_records: 1,
            detected_at: Utc::now(),
            details: serde_json::Value::Null,
        }
    }

    #[test]
    fn overall_status_precedence() {
        let healthy = vec![
            metrics(Marketplace::Ozon, HealthStatus::Healthy),
            metrics(Marketplace::Wildberries, HealthStatus::Healthy),
        ];
        assert_eq!(overall_status(&healthy, &[]), HealthStatus::Healthy);
        assert_eq!(
            overall_status(&healthy, &[anomaly(Severity::Low)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            overall_status(&healthy, &[anomaly(Severity::Medium)]),
            HealthStatus::Warning
        );
        assert_eq!(
            overall_status(&healthy, &[anomaly(Severity::Critical)]),
            HealthStatus::Critical
        );

        let degraded = vec![
            metrics(Marketplace::Ozon, HealthStatus::Critical),
            metrics(Marketplace::Wildberries, HealthStatus::Healthy),
        ];
        assert_eq!(overall_status(&degraded, &[]), HealthStatus::Critical);
    }

    #[test]
    fn overall_status_unknown_without_data() {
        let mut empty = metrics(Marketplace::Ozon, HealthStatus::Unknown);
        empty.total_records = 0;
        assert_eq!(overall_status(&[empty], &[]), HealthStatus::Unknown);
    }

    #[test]
    fn aggregate_counts_every_severity() {
        let sources = vec![metrics(Marketplace::Ozon, HealthStatus::Healthy)];
        let agg = aggregate(&sources, &[anomaly(Severity::High), anomaly(Severity::High)]);
        assert_eq!(agg.total_records, 10);
        assert_eq!(agg.total_anomalies, 2);
        assert_eq!(agg.anomalies_by_severity[&Severity::High], 2);
        assert_eq!(agg.anomalies_by_severity[&Severity::Low], 0);
        assert_eq!(agg.average_success_rate, Some(100.0));
    }

    #[test]
    fn recommendations_cover_sources_and_anomalies() {
        let mut stale = metrics(Marketplace::Wildberries, HealthStatus::Warning);
        stale.hours_since_last_success = Some(8.0);
        let out = recommendations(
            &[stale],
            &[anomaly(Severity::Medium)],
            &HealthThresholds::default(),
        );
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("Wildberries"));
        assert!(out[1].contains("recover cleanup"));
    }
}
