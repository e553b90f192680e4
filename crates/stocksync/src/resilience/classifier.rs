use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::entity::marketplace::Marketplace;
use crate::platform::{PlatformError, short_error_message};

/// Per-source history is trimmed back to this many entries...
const HISTORY_KEEP: usize = 50;
/// ...once it grows past this many.
const HISTORY_CAP: usize = 100;

/// Fixed failure taxonomy for marketplace calls.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ApiRateLimit,
    ApiAuthError,
    ApiValidationError,
    ApiUnavailable,
    ApiTimeout,
    NetworkError,
    UnknownError,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::ApiRateLimit => "API_RATE_LIMIT",
            ErrorType::ApiAuthError => "API_AUTH_ERROR",
            ErrorType::ApiValidationError => "API_VALIDATION_ERROR",
            ErrorType::ApiUnavailable => "API_UNAVAILABLE",
            ErrorType::ApiTimeout => "API_TIMEOUT",
            ErrorType::NetworkError => "NETWORK_ERROR",
            ErrorType::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Auth and validation failures never succeed on retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorType::ApiAuthError | ErrorType::ApiValidationError)
    }

    fn delay_multiplier(self) -> f64 {
        match self {
            ErrorType::ApiRateLimit => 2.0,
            ErrorType::ApiTimeout => 1.5,
            _ => 1.0,
        }
    }

    /// Map an HTTP status to a category.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => ErrorType::ApiRateLimit,
            401 | 403 => ErrorType::ApiAuthError,
            400 | 422 => ErrorType::ApiValidationError,
            408 => ErrorType::ApiTimeout,
            500..=599 => ErrorType::ApiUnavailable,
            _ => ErrorType::UnknownError,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error_type: ErrorType,
    pub source: Marketplace,
    /// 1-based attempt that produced this error.
    pub attempt_number: u32,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub retry_after: Option<Duration>,
    pub http_status: Option<u16>,
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.error_type, self.attempt_number, self.error_message
        )
    }
}

/// Retry ceiling, backoff shape and burst protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub exponential_base: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// More than this many errors inside the burst window stops retries.
    pub burst_threshold: usize,
    pub burst_window_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            exponential_base: 2.0,
            max_delay_ms: 5 * 60 * 1_000,
            jitter: true,
            burst_threshold: 10,
            burst_window_secs: 5 * 60,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_secs)
    }
}

/// Classifies failures, keeps per-source error history and decides retries.
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    policy: RetryPolicy,
    history: Mutex<HashMap<Marketplace, VecDeque<ErrorContext>>>,
}

impl ErrorClassifier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Map an error to the taxonomy.
    ///
    /// Status codes win; status-less errors fall back to the error kind and
    /// then to message heuristics.
    pub fn classify(&self, error: &PlatformError) -> ErrorType {
        if let Some(status) = error.status() {
            return ErrorType::from_status(status);
        }
        match error {
            PlatformError::Timeout { .. } => ErrorType::ApiTimeout,
            PlatformError::Network { .. } => ErrorType::NetworkError,
            other => classify_message(&other.to_string()),
        }
    }

    /// Build the context for a failed attempt.
    pub fn context(
        &self,
        error: &PlatformError,
        source: Marketplace,
        attempt_number: u32,
    ) -> ErrorContext {
        ErrorContext {
            error_type: self.classify(error),
            source,
            attempt_number,
            error_message: short_error_message(error),
            timestamp: Utc::now(),
            retry_after: error.retry_after(),
            http_status: error.status(),
        }
    }

    /// Append to the source's rolling history.
    pub fn record(&self, ctx: ErrorContext) {
        tracing::warn!(
            source = %ctx.source,
            error_type = %ctx.error_type,
            attempt = ctx.attempt_number,
            status = ?ctx.http_status,
            "{}",
            ctx.error_message
        );

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let entries = history.entry(ctx.source).or_default();
        entries.push_back(ctx);
        if entries.len() > HISTORY_CAP {
            let excess = entries.len() - HISTORY_KEEP;
            entries.drain(..excess);
        }
    }

    /// Retry decision against the policy's attempt ceiling.
    pub fn should_retry(&self, ctx: &ErrorContext) -> bool {
        self.should_retry_within(ctx, self.policy.max_attempts)
    }

    /// Retry decision against a caller-provided attempt ceiling.
    pub fn should_retry_within(&self, ctx: &ErrorContext, max_attempts: u32) -> bool {
        if ctx.attempt_number >= max_attempts {
            return false;
        }
        if !ctx.error_type.is_retryable() {
            return false;
        }

        let recent = self.recent_error_count(ctx.source, Utc::now());
        if recent > self.policy.burst_threshold {
            tracing::warn!(
                source = %ctx.source,
                recent,
                threshold = self.policy.burst_threshold,
                "Error burst detected, not retrying"
            );
            return false;
        }

        true
    }

    fn recent_error_count(&self, source: Marketplace, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(self.policy.burst_window())
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .get(&source)
            .map_or(0, |h| h.iter().filter(|c| c.timestamp >= cutoff).count())
    }

    /// Deterministic delay before retrying `attempt`.
    ///
    /// A server-supplied `retry_after` is returned verbatim. Otherwise the
    /// delay is `base * multiplier(type) * exponential_base^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn calculate_delay(
        &self,
        attempt: u32,
        error_type: ErrorType,
        retry_after: Option<Duration>,
    ) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after;
        }

        let exponent = attempt.max(1) - 1;
        let growth = self
            .policy
            .exponential_base
            .max(1.0)
            .powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        let secs = self.policy.base_delay().as_secs_f64() * error_type.delay_multiplier() * growth;
        let max = self.policy.max_delay().as_secs_f64();

        Duration::from_secs_f64(secs.min(max))
    }

    /// Delay for retrying after `ctx`, with 10-30% jitter when enabled.
    pub fn backoff_delay(&self, ctx: &ErrorContext) -> Duration {
        let delay = self.calculate_delay(ctx.attempt_number, ctx.error_type, ctx.retry_after);
        if !self.policy.jitter || ctx.retry_after.is_some() {
            return delay;
        }
        let factor = rand::rng().random_range(0.1..=0.3);
        delay + delay.mul_f64(factor)
    }

    /// Error counts per category for a source.
    pub fn error_summary(&self, source: Marketplace) -> BTreeMap<ErrorType, usize> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = BTreeMap::new();
        for ctx in history.get(&source).into_iter().flatten() {
            *summary.entry(ctx.error_type).or_insert(0) += 1;
        }
        summary
    }

    /// Copy of the source's error history, oldest first.
    pub fn history(&self, source: Marketplace) -> Vec<ErrorContext> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history
            .get(&source)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, source: Marketplace) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.remove(&source);
    }
}

fn classify_message(message: &str) -> ErrorType {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        ErrorType::ApiTimeout
    } else if lower.contains("connection") || lower.contains("dns") {
        ErrorType::NetworkError
    } else {
        ErrorType::UnknownError
    }
}
