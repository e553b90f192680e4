//! Read-only health checks over stored inventory and run history.
//!
//! The [`HealthMonitor`] never touches the sync path: it scans what previous
//! runs persisted, computes per-source [`SyncMetrics`], runs a set of
//! independent [`AnomalyDetector`]s and folds everything into a
//! [`HealthReport`].

mod detectors;
mod monitor;
mod types;

pub use detectors::{
    AnomalyDetector, DetectionInput, DuplicateKeyDetector, ErrorSpikeDetector,
    NegativeStockDetector, RecordCountDropDetector, StalenessDetector, StockSwingDetector,
    ZeroStockDetector, default_detectors,
};
pub use monitor::{HealthError, HealthMonitor};
pub use types::{
    AggregateMetrics, Anomaly, AnomalyType, HealthReport, HealthStatus, HealthThresholds,
    Severity, SyncMetrics,
};
