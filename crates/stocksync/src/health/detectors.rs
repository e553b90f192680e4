//! Independent anomaly detectors.
//!
//! Each detector looks at one source's latest and previous snapshots plus its
//! recent failures and reports zero or more [`Anomaly`]s. Detectors share no
//! state and can be combined freely.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

use crate::entity::inventory_record::Model;
use crate::entity::marketplace::Marketplace;

use super::types::{Anomaly, AnomalyType, HealthThresholds, Severity};

/// What a detector gets to look at for one source.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub source: Marketplace,
    pub now: DateTime<Utc>,
    pub latest_date: Option<NaiveDate>,
    /// Rows of the most recent snapshot.
    pub latest: &'a [Model],
    pub previous_date: Option<NaiveDate>,
    /// Rows of the snapshot before that.
    pub previous: &'a [Model],
    /// Failed runs in the last 24 hours.
    pub failed_runs_24h: u64,
}

impl DetectionInput<'_> {
    fn anomaly(
        &self,
        anomaly_type: AnomalyType,
        severity: Severity,
        affected_records: u64,
        description: String,
        details: serde_json::Value,
    ) -> Anomaly {
        Anomaly {
            anomaly_type,
            severity,
            source: self.source,
            description,
            affected_records,
            detected_at: self.now,
            details,
        }
    }
}

pub trait AnomalyDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, input: &DetectionInput<'_>, thresholds: &HealthThresholds) -> Vec<Anomaly>;
}

/// All built-in detectors.
pub fn default_detectors() -> Vec<Box<dyn AnomalyDetector>> {
    vec![
        Box::new(ZeroStockDetector),
        Box::new(StockSwingDetector),
        Box::new(RecordCountDropDetector),
        Box::new(DuplicateKeyDetector),
        Box::new(NegativeStockDetector),
        Box::new(StalenessDetector),
        Box::new(ErrorSpikeDetector),
    ]
}

type StockKey<'a> = (Option<&'a str>, Option<&'a str>, &'a str);

fn stock_key(row: &Model) -> StockKey<'_> {
    (
        row.product_id.as_deref(),
        row.warehouse_id.as_deref(),
        row.stock_type.as_str(),
    )
}

// ─── Snapshot Content ────────────────────────────────────────────────────────

/// Share of zero-quantity rows in the latest snapshot.
pub struct ZeroStockDetector;

impl AnomalyDetector for ZeroStockDetector {
    fn name(&self) -> &'static str {
        "zero_stock"
    }

    fn detect(&self, input: &DetectionInput<'_>, thresholds: &HealthThresholds) -> Vec<Anomaly> {
        if input.latest.is_empty() {
            return Vec::new();
        }
        let zero = input.latest.iter().filter(|r| r.quantity == 0).count();
        let ratio = zero as f64 / input.latest.len() as f64;
        if ratio <= thresholds.zero_stock_ratio {
            return Vec::new();
        }

        let severity = if ratio > (thresholds.zero_stock_ratio * 2.0).min(0.9) {
            Severity::High
        } else {
            Severity::Medium
        };
        vec![input.anomaly(
            AnomalyType::ZeroStock,
            severity,
            zero as u64,
            format!(
                "{:.0}% of {} stock rows are zero",
                ratio * 100.0,
                input.latest.len()
            ),
            json!({ "zero_rows": zero, "total_rows": input.latest.len(), "ratio": ratio }),
        )]
    }
}

/// Day-over-day quantity swings across many SKUs.
pub struct StockSwingDetector;

impl AnomalyDetector for StockSwingDetector {
    fn name(&self) -> &'static str {
        "stock_swing"
    }

    fn detect(&self, input: &DetectionInput<'_>, thresholds: &HealthThresholds) -> Vec<Anomaly> {
        if input.latest.is_empty() || input.previous.is_empty() {
            return Vec::new();
        }

        let previous: HashMap<StockKey<'_>, i64> = input
            .previous
            .iter()
            .map(|r| (stock_key(r), r.quantity))
            .collect();

        let mut compared = 0usize;
        let mut swings = 0usize;
        for row in input.latest {
            let Some(&before) = previous.get(&stock_key(row)) else {
                continue;
            };
            compared += 1;
            let delta = (row.quantity - before).abs();
            let relative = delta as f64 / before.abs().max(1) as f64;
            if delta > thresholds.swing_absolute && relative > thresholds.swing_relative {
                swings += 1;
            }
        }

        if swings <= thresholds.swing_min_skus {
            return Vec::new();
        }
        let severity = if swings * 2 > compared {
            Severity::High
        } else {
            Severity::Medium
        };
        vec![input.anomaly(
            AnomalyType::StockSwing,
            severity,
            swings as u64,
            format!("{swings} of {compared} SKUs swung sharply since the previous snapshot"),
            json!({
                "swings": swings,
                "compared": compared,
                "previous_date": input.previous_date,
                "latest_date": input.latest_date,
            }),
        )]
    }
}

/// Fewer rows than the previous snapshot by more than the allowed ratio.
pub struct RecordCountDropDetector;

impl AnomalyDetector for RecordCountDropDetector {
    fn name(&self) -> &'static str {
        "record_count_drop"
    }

    fn detect(&self, input: &DetectionInput<'_>, thresholds: &HealthThresholds) -> Vec<Anomaly> {
        let before = input.previous.len();
        let after = input.latest.len();
        if before == 0 || after >= before {
            return Vec::new();
        }
        let drop = (before - after) as f64 / before as f64;
        if drop <= thresholds.count_drop_ratio {
            return Vec::new();
        }

        let severity = if drop > 0.5 {
            Severity::Critical
        } else {
            Severity::High
        };
        vec![input.anomaly(
            AnomalyType::RecordCountDrop,
            severity,
            (before - after) as u64,
            format!(
                "record count dropped {:.0}% ({before} -> {after})",
                drop * 100.0
            ),
            json!({ "previous": before, "latest": after, "drop_ratio": drop }),
        )]
    }
}

/// More than one row per natural key in the latest snapshot.
pub struct DuplicateKeyDetector;

impl AnomalyDetector for DuplicateKeyDetector {
    fn name(&self) -> &'static str {
        "duplicate_keys"
    }

    fn detect(&self, input: &DetectionInput<'_>, _thresholds: &HealthThresholds) -> Vec<Anomaly> {
        let mut counts: HashMap<StockKey<'_>, usize> = HashMap::new();
        for row in input.latest {
            *counts.entry(stock_key(row)).or_default() += 1;
        }
        let keys = counts.values().filter(|&&n| n > 1).count();
        let extra: usize = counts.values().map(|n| n - 1).sum();
        if extra == 0 {
            return Vec::new();
        }

        vec![input.anomaly(
            AnomalyType::DuplicateKeys,
            Severity::Medium,
            extra as u64,
            format!("{extra} duplicate rows across {keys} keys"),
            json!({ "duplicated_keys": keys, "extra_rows": extra }),
        )]
    }
}

/// Negative quantities or reservations.
pub struct NegativeStockDetector;

impl AnomalyDetector for NegativeStockDetector {
    fn name(&self) -> &'static str {
        "negative_stock"
    }

    fn detect(&self, input: &DetectionInput<'_>, _thresholds: &HealthThresholds) -> Vec<Anomaly> {
        let negative = input
            .latest
            .iter()
            .filter(|r| r.quantity < 0 || r.reserved < 0)
            .count();
        if negative == 0 {
            return Vec::new();
        }

        vec![input.anomaly(
            AnomalyType::NegativeStock,
            Severity::High,
            negative as u64,
            format!("{negative} rows with negative stock"),
            json!({ "negative_rows": negative }),
        )]
    }
}

// ─── Run History ─────────────────────────────────────────────────────────────

/// Latest snapshot written too long ago.
pub struct StalenessDetector;

impl AnomalyDetector for StalenessDetector {
    fn name(&self) -> &'static str {
        "staleness"
    }

    fn detect(&self, input: &DetectionInput<'_>, thresholds: &HealthThresholds) -> Vec<Anomaly> {
        let Some(last_write) = input.latest.iter().map(|r| r.synced_at).max() else {
            return Vec::new();
        };
        let hours = (input.now - last_write.with_timezone(&Utc)).num_minutes() as f64 / 60.0;
        if hours <= thresholds.freshness_warning_hours {
            return Vec::new();
        }

        let severity = if hours > thresholds.freshness_critical_hours {
            Severity::High
        } else {
            Severity::Medium
        };
        vec![input.anomaly(
            AnomalyType::StaleData,
            severity,
            input.latest.len() as u64,
            format!("latest snapshot was written {hours:.1}h ago"),
            json!({ "hours_since_write": hours, "latest_date": input.latest_date }),
        )]
    }
}

/// Many failed runs in the last day.
pub struct ErrorSpikeDetector;

impl AnomalyDetector for ErrorSpikeDetector {
    fn name(&self) -> &'static str {
        "error_spike"
    }

    fn detect(&self, input: &DetectionInput<'_>, thresholds: &HealthThresholds) -> Vec<Anomaly> {
        if input.failed_runs_24h < thresholds.error_spike_count {
            return Vec::new();
        }

        let severity = if input.failed_runs_24h >= thresholds.error_spike_count * 2 {
            Severity::Critical
        } else {
            Severity::High
        };
        vec![input.anomaly(
            AnomalyType::ErrorSpike,
            severity,
            0,
            format!("{} failed runs in the last 24h", input.failed_runs_24h),
            json!({ "failed_runs": input.failed_runs_24h }),
        )]
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn row(product: &str, qty: i64) -> Model {
        Model {
            id: Uuid::new_v4(),
            source: Marketplace::Ozon,
            product_id: Some(product.to_string()),
            sku: format!("SKU-{product}"),
            warehouse_id: Some("1".to_string()),
            stock_type: "fbo".to_string(),
            quantity: qty,
            reserved: 0,
            snapshot_date: NaiveDate::from_ymd_opt(2026, 3, 2).expect("valid date"),
            sync_session_id: None,
            created_session_id: None,
            synced_at: Utc::now().fixed_offset(),
        }
    }

    fn input<'a>(latest: &'a [Model], previous: &'a [Model]) -> DetectionInput<'a> {
        DetectionInput {
            source: Marketplace::Ozon,
            now: Utc::now(),
            latest_date: latest.first().map(|r| r.snapshot_date),
            latest,
            previous_date: previous.first().map(|r| r.snapshot_date),
            previous,
            failed_runs_24h: 0,
        }
    }

    #[test]
    fn zero_stock_reported_above_ratio() {
        let t = HealthThresholds::default();
        let healthy: Vec<Model> = (0..10).map(|i| row(&i.to_string(), i64::from(i > 2))).collect();
        assert!(ZeroStockDetector.detect(&input(&healthy, &[]), &t).is_empty());

        let empty_shelves: Vec<Model> =
            (0..10).map(|i| row(&i.to_string(), i64::from(i > 4))).collect();
        let found = ZeroStockDetector.detect(&input(&empty_shelves, &[]), &t);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].affected_records, 5);
    }

    #[test]
    fn stock_swings_need_relative_absolute_and_breadth() {
        let t = HealthThresholds::default();
        let previous: Vec<Model> = (0..20).map(|i| row(&i.to_string(), 500)).collect();

        let few: Vec<Model> = (0..20)
            .map(|i| row(&i.to_string(), if i < 10 { 50 } else { 500 }))
            .collect();
        assert!(StockSwingDetector.detect(&input(&few, &previous), &t).is_empty());

        let many: Vec<Model> = (0..20)
            .map(|i| row(&i.to_string(), if i < 11 { 50 } else { 500 }))
            .collect();
        let found = StockSwingDetector.detect(&input(&many, &previous), &t);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].affected_records, 11);
        assert_eq!(found[0].severity, Severity::High);

        // Large relative change on small numbers is not a swing.
        let small_prev: Vec<Model> = (0..20).map(|i| row(&i.to_string(), 10)).collect();
        let small: Vec<Model> = (0..20).map(|i| row(&i.to_string(), 90)).collect();
        assert!(StockSwingDetector.detect(&input(&small, &small_prev), &t).is_empty());
    }

    #[test]
    fn record_count_drop_beyond_ratio() {
        let t = HealthThresholds::default();
        let previous: Vec<Model> = (0..10).map(|i| row(&i.to_string(), 1)).collect();
        assert!(
            RecordCountDropDetector
                .detect(&input(&previous[..8], &previous), &t)
                .is_empty()
        );

        let found = RecordCountDropDetector.detect(&input(&previous[..7], &previous), &t);
        assert_eq!(found[0].affected_records, 3);
        assert_eq!(found[0].severity, Severity::High);
    }

    #[test]
    fn duplicates_and_negatives() {
        let t = HealthThresholds::default();
        let rows = vec![row("a", 1), row("a", 2), row("a", 3), row("b", -1)];

        let dups = DuplicateKeyDetector.detect(&input(&rows, &[]), &t);
        assert_eq!(dups[0].affected_records, 2);

        let negatives = NegativeStockDetector.detect(&input(&rows, &[]), &t);
        assert_eq!(negatives[0].affected_records, 1);
    }

    #[test]
    fn staleness_by_last_write() {
        let t = HealthThresholds::default();
        let mut rows = vec![row("a", 1)];
        assert!(StalenessDetector.detect(&input(&rows, &[]), &t).is_empty());

        rows[0].synced_at = (Utc::now() - Duration::hours(30)).fixed_offset();
        let found = StalenessDetector.detect(&input(&rows, &[]), &t);
        assert_eq!(found[0].severity, Severity::High);
    }

    #[test]
    fn error_spike_at_threshold() {
        let t = HealthThresholds::default();
        let mut data = input(&[], &[]);
        data.failed_runs_24h = 4;
        assert!(ErrorSpikeDetector.detect(&data, &t).is_empty());
        data.failed_runs_24h = 5;
        assert_eq!(ErrorSpikeDetector.detect(&data, &t).len(), 1);
    }
}
