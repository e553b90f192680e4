//! Retry utilities for database writes.
//!
//! Marketplace calls are retried by [`ResilientClient`](crate::resilience::ResilientClient)
//! under the classified policy; this module covers the other side of a sync,
//! where SQLite lock contention or a dropped pool connection should be ridden
//! out with a short exponential backoff.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};

/// Configuration for retry operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Minimum delay between retries, in milliseconds.
    pub min_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds.
    pub max_delay_ms: u64,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 2_000,
            max_retries: 3,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay_ms: min_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Whether a database error is worth retrying (lock contention, lost connection).
pub fn is_retryable_db_error(err: &DbErr) -> bool {
    match err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => true,
        DbErr::Exec(_) | DbErr::Query(_) => {
            let err_str = err.to_string().to_lowercase();
            // SQLite: database is locked, busy
            // PostgreSQL/MySQL: connection reset, deadlock, too many connections
            err_str.contains("locked")
                || err_str.contains("busy")
                || err_str.contains("deadlock")
                || err_str.contains("timeout")
                || err_str.contains("connection")
                || err_str.contains("temporarily unavailable")
        }
        _ => false,
    }
}

/// Execute an operation, retrying errors accepted by `is_transient`.
///
/// # Example
///
/// ```ignore
/// use stocksync::retry::{RetryConfig, is_retryable_db_error, with_retry};
///
/// let rows = with_retry(
///     || async { InventoryRecord::find().all(&db).await },
///     &RetryConfig::default(),
///     is_retryable_db_error,
///     "load snapshot",
/// )
/// .await?;
/// ```
pub async fn with_retry<T, E, F, Fut, P>(
    operation: F,
    config: &RetryConfig,
    is_transient: P,
    label: &str,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempt = AtomicU32::new(0);
    let mut operation = operation;

    let retry_op = || {
        attempt.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    retry_op
        .retry(config.clone().into_backoff())
        .when(|e| is_transient(e))
        .notify(|err, dur| {
            tracing::warn!(
                operation = label,
                attempt = attempt.load(Ordering::SeqCst),
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "Transient failure, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.min_delay_ms, 100);
        assert_eq!(config.max_delay_ms, 2_000);
        assert_eq!(config.max_retries, 3);
        assert!(config.with_jitter);
    }

    #[test]
    fn test_retry_config_custom() {
        let config = RetryConfig::new(Duration::from_secs(2), Duration::from_secs(30), 5)
            .with_jitter(false);
        assert_eq!(config.min_delay_ms, 2_000);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.max_retries, 5);
        assert!(!config.with_jitter);
        let _backoff = config.into_backoff();
    }

    #[test]
    fn test_connection_errors_are_retryable() {
        assert!(is_retryable_db_error(&DbErr::Conn(sea_orm::RuntimeErr::Internal(
            "connection reset".into()
        ))));
        assert!(is_retryable_db_error(&DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "database is locked".into()
        ))));
        assert!(!is_retryable_db_error(&DbErr::Exec(sea_orm::RuntimeErr::Internal(
            "syntax error".into()
        ))));
        assert!(!is_retryable_db_error(&DbErr::RecordNotFound("x".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let result = with_retry(
            move || {
                let calls = Arc::clone(&calls_capture);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DbErr::Conn(sea_orm::RuntimeErr::Internal("gone".into())))
                    } else {
                        Ok(7)
                    }
                }
            },
            &RetryConfig::default(),
            is_retryable_db_error,
            "test",
        )
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let err = with_retry(
            move || {
                let calls = Arc::clone(&calls_capture);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DbErr::RecordNotFound("missing".into()))
                }
            },
            &RetryConfig::default(),
            is_retryable_db_error,
            "test",
        )
        .await
        .expect_err("permanent error");

        assert!(matches!(err, DbErr::RecordNotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
