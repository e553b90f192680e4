use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::marketplace::Marketplace;

/// Batch sizing bounds and feedback thresholds for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizeConfig {
    pub current_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Success rate at or above which the batch may grow.
    pub success_threshold: f64,
    /// Success rate below which the batch shrinks sharply.
    pub error_threshold: f64,
    /// Average latency under which a healthy batch may grow.
    pub fast_latency_ms: u64,
    /// Average latency above which the batch shrinks sharply.
    pub slow_latency_ms: u64,
}

impl Default for BatchSizeConfig {
    fn default() -> Self {
        Self {
            current_size: 1000,
            min_size: 100,
            max_size: 5000,
            success_threshold: 0.95,
            error_threshold: 0.80,
            fast_latency_ms: 2_000,
            slow_latency_ms: 10_000,
        }
    }
}

impl BatchSizeConfig {
    pub fn fast_latency(&self) -> Duration {
        Duration::from_millis(self.fast_latency_ms)
    }

    pub fn slow_latency(&self) -> Duration {
        Duration::from_millis(self.slow_latency_ms)
    }

    fn scaled(&self, factor: f64) -> usize {
        let scaled = (self.current_size as f64 * factor).round() as usize;
        scaled.clamp(self.min_size, self.max_size.max(self.min_size))
    }
}

/// Key identifying a batch-size controller, e.g. `ozon:stocks`.
pub fn op_key(source: Marketplace, task_type: &str) -> String {
    format!("{}:{}", source.as_str(), task_type)
}

/// Feedback controller that grows or shrinks batch sizes per operation.
///
/// Unknown operation keys start from the default [`BatchSizeConfig`].
#[derive(Debug, Default)]
pub struct AdaptiveBatcher {
    defaults: BatchSizeConfig,
    configs: Mutex<HashMap<String, BatchSizeConfig>>,
}

impl AdaptiveBatcher {
    pub fn new(defaults: BatchSizeConfig) -> Self {
        Self {
            defaults,
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Install an explicit configuration for an operation.
    pub fn register(&self, op_key: impl Into<String>, config: BatchSizeConfig) {
        let mut configs = self.configs.lock().unwrap_or_else(|e| e.into_inner());
        configs.insert(op_key.into(), config);
    }

    /// Current batch size for an operation.
    pub fn batch_size(&self, op_key: &str) -> usize {
        let configs = self.configs.lock().unwrap_or_else(|e| e.into_inner());
        configs
            .get(op_key)
            .map_or(self.defaults.current_size, |c| c.current_size)
    }

    /// Feed back an observed success rate and latency; returns the new size.
    ///
    /// Grows 20% when calls are healthy and fast, shrinks 20% when the success
    /// rate falls below the error threshold or calls are very slow, and
    /// shrinks 10% when the success rate sits between the two thresholds.
    pub fn adapt(&self, op_key: &str, success_rate: f64, avg_latency: Duration) -> usize {
        let mut configs = self.configs.lock().unwrap_or_else(|e| e.into_inner());
        let config = configs
            .entry(op_key.to_string())
            .or_insert(self.defaults);

        let previous = config.current_size;
        let next = if success_rate >= config.success_threshold && avg_latency < config.fast_latency() {
            config.scaled(1.2)
        } else if success_rate < config.error_threshold || avg_latency > config.slow_latency() {
            config.scaled(0.8)
        } else if success_rate < config.success_threshold {
            config.scaled(0.9)
        } else {
            previous.clamp(config.min_size, config.max_size.max(config.min_size))
        };
        config.current_size = next;

        if next != previous {
            tracing::debug!(
                op = op_key,
                previous,
                next,
                success_rate,
                latency_ms = avg_latency.as_millis() as u64,
                "Adjusted batch size"
            );
        }

        next
    }

    /// Copy of every registered configuration.
    pub fn snapshot(&self) -> HashMap<String, BatchSizeConfig> {
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
