use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::marketplace::Marketplace;

/// Health of one source or of the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    /// Nothing has ever been recorded.
    Unknown,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }

    fn rank(self) -> u8 {
        match self {
            HealthStatus::Unknown => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Warning => 2,
            HealthStatus::Critical => 3,
        }
    }

    /// The more severe of two statuses; `Unknown` loses to everything.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.rank() > self.rank() { other } else { self }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    ZeroStock,
    StockSwing,
    RecordCountDrop,
    DuplicateKeys,
    NegativeStock,
    StaleData,
    ErrorSpike,
}

impl AnomalyType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnomalyType::ZeroStock => "zero_stock",
            AnomalyType::StockSwing => "stock_swing",
            AnomalyType::RecordCountDrop => "record_count_drop",
            AnomalyType::DuplicateKeys => "duplicate_keys",
            AnomalyType::NegativeStock => "negative_stock",
            AnomalyType::StaleData => "stale_data",
            AnomalyType::ErrorSpike => "error_spike",
        }
    }

    /// Suggested operator action.
    pub fn recommendation(self) -> &'static str {
        match self {
            AnomalyType::ZeroStock => {
                "Many SKUs report zero stock; verify the warehouse mapping and that the API returned complete data"
            }
            AnomalyType::StockSwing => {
                "Large day-over-day stock swings; compare against marketplace reports before using the snapshot"
            }
            AnomalyType::RecordCountDrop => {
                "Fewer records than the previous snapshot; rerun the sync or force a resync of the affected days"
            }
            AnomalyType::DuplicateKeys => {
                "Duplicate stock rows found; run `recover cleanup` to keep the most recent row per key"
            }
            AnomalyType::NegativeStock => {
                "Negative stock values stored; run `recover cleanup` and check the record mapping"
            }
            AnomalyType::StaleData => {
                "Inventory data is stale; check that scheduled syncs are running"
            }
            AnomalyType::ErrorSpike => {
                "Repeated failed runs; check marketplace credentials, rate limits and API status"
            }
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected irregularity. Produced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub source: Marketplace,
    pub description: String,
    pub affected_records: u64,
    pub detected_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Per-source run statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncMetrics {
    pub source: Marketplace,
    pub status: HealthStatus,
    pub runs_24h: u64,
    /// Share of finished runs in the last 24h that succeeded, in percent.
    /// `None` when no run finished in that window.
    pub success_rate_24h: Option<f64>,
    pub average_duration_ms: Option<f64>,
    pub error_count_24h: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub hours_since_last_success: Option<f64>,
    pub total_records: u64,
    pub latest_snapshot_date: Option<NaiveDate>,
}

impl SyncMetrics {
    pub fn has_data(&self) -> bool {
        self.status != HealthStatus::Unknown || self.total_records > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub total_records: u64,
    pub total_anomalies: usize,
    pub anomalies_by_severity: BTreeMap<Severity, usize>,
    /// Mean of the per-source 24h success rates that are known.
    pub average_success_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub generated_at: DateTime<Utc>,
    pub sources: Vec<SyncMetrics>,
    pub anomalies: Vec<Anomaly>,
    pub recommendations: Vec<String>,
    pub metrics: AggregateMetrics,
}

/// Every threshold the health pass uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub freshness_warning_hours: f64,
    pub freshness_critical_hours: f64,
    /// Percent.
    pub success_rate_warning: f64,
    /// Percent.
    pub success_rate_critical: f64,
    /// Share of zero-quantity rows above which the snapshot is suspicious.
    pub zero_stock_ratio: f64,
    pub swing_relative: f64,
    pub swing_absolute: i64,
    /// Swings must affect more than this many SKUs to be reported.
    pub swing_min_skus: usize,
    pub count_drop_ratio: f64,
    /// Failed runs in 24h that count as a spike.
    pub error_spike_count: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            freshness_warning_hours: 6.0,
            freshness_critical_hours: 24.0,
            success_rate_warning: 80.0,
            success_rate_critical: 50.0,
            zero_stock_ratio: 0.30,
            swing_relative: 0.50,
            swing_absolute: 100,
            swing_min_skus: 10,
            count_drop_ratio: 0.20,
            error_spike_count: 5,
        }
    }
}

impl HealthThresholds {
    /// Status implied by hours since the last successful run.
    pub fn freshness_status(&self, hours: Option<f64>) -> HealthStatus {
        match hours {
            None => HealthStatus::Critical,
            Some(h) if h > self.freshness_critical_hours => HealthStatus::Critical,
            Some(h) if h > self.freshness_warning_hours => HealthStatus::Warning,
            Some(_) => HealthStatus::Healthy,
        }
    }

    /// Status implied by a 24h success rate in percent.
    pub fn success_rate_status(&self, rate: Option<f64>) -> HealthStatus {
        match rate {
            None => HealthStatus::Healthy,
            Some(r) if r < self.success_rate_critical => HealthStatus::Critical,
            Some(r) if r < self.success_rate_warning => HealthStatus::Warning,
            Some(_) => HealthStatus::Healthy,
        }
    }
}
