use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::entity::marketplace::Marketplace;
use crate::platform::{FetchFilters, MarketplaceClient, Page, PageCursor, RateLimiter};
use crate::request_cache::{CacheKey, RequestCache};

use super::classifier::{ErrorClassifier, ErrorContext, ErrorType};

/// Outcome of one resilient page fetch.
#[derive(Debug, Clone)]
pub struct CallReport {
    pub outcome: Result<Page, ErrorContext>,
    /// HTTP attempts made (zero for a cache hit).
    pub attempts: u32,
    /// Attempts that failed, retried or not.
    pub failures: u32,
    pub from_cache: bool,
    /// Time spent inside the marketplace call itself, summed over attempts.
    pub latency: Duration,
}

impl CallReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Cache lookup, rate-limit wait, the marketplace call, and classified retry
/// composed into one operation.
pub struct ResilientClient {
    client: Arc<dyn MarketplaceClient>,
    cache: Arc<RequestCache>,
    limiter: Arc<RateLimiter>,
    classifier: Arc<ErrorClassifier>,
    shutdown: Arc<AtomicBool>,
}

impl ResilientClient {
    pub fn new(
        client: Arc<dyn MarketplaceClient>,
        cache: Arc<RequestCache>,
        limiter: Arc<RateLimiter>,
        classifier: Arc<ErrorClassifier>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            cache,
            limiter,
            classifier,
            shutdown,
        }
    }

    pub fn marketplace(&self) -> Marketplace {
        self.client.marketplace()
    }

    pub fn inner(&self) -> &Arc<dyn MarketplaceClient> {
        &self.client
    }

    fn cache_key(&self, cursor: Option<&PageCursor>, filters: &FetchFilters) -> CacheKey {
        let mut key = CacheKey::new(self.client.cache_type())
            .param("source", self.client.marketplace().as_str())
            .param("task", self.client.task_type())
            .param("cursor", cursor.map_or("", PageCursor::as_str))
            .param("limit", filters.limit);
        if let Some(since) = filters.changed_since {
            key = key.param("changed_since", since.to_rfc3339());
        }
        key
    }

    /// Fetch one page, retrying classified transient failures.
    ///
    /// The shutdown flag is checked before every attempt; a cancelled call
    /// reports an `UNKNOWN_ERROR` context and is not retried.
    pub async fn fetch_page(
        &self,
        cursor: Option<&PageCursor>,
        filters: &FetchFilters,
    ) -> CallReport {
        let source = self.client.marketplace();
        let key = self.cache_key(cursor, filters);

        if let Some(cached) = self.cache.get(&key)
            && let Ok(page) = serde_json::from_value::<Page>(cached)
        {
            tracing::debug!(source = %source, cursor = ?cursor, "Serving page from cache");
            return CallReport {
                outcome: Ok(page),
                attempts: 0,
                failures: 0,
                from_cache: true,
                latency: Duration::ZERO,
            };
        }

        let mut attempt = 0u32;
        let mut failures = 0u32;
        let mut latency = Duration::ZERO;

        loop {
            attempt += 1;

            if self.shutdown.load(Ordering::SeqCst) {
                return CallReport {
                    outcome: Err(ErrorContext {
                        error_type: ErrorType::UnknownError,
                        source,
                        attempt_number: attempt,
                        error_message: "shutdown requested".to_string(),
                        timestamp: Utc::now(),
                        retry_after: None,
                        http_status: None,
                    }),
                    attempts: attempt - 1,
                    failures,
                    from_cache: false,
                    latency,
                };
            }

            self.limiter.wait(source).await;
            let started = Instant::now();
            let result = self.client.fetch_page(cursor, filters).await;
            latency += started.elapsed();
            self.limiter.record(source);

            match result {
                Ok(page) => {
                    match serde_json::to_value(&page) {
                        Ok(value) => self.cache.set(&key, value, None),
                        Err(e) => tracing::debug!(error = %e, "Page not cacheable"),
                    }
                    return CallReport {
                        outcome: Ok(page),
                        attempts: attempt,
                        failures,
                        from_cache: false,
                        latency,
                    };
                }
                Err(e) => {
                    failures += 1;
                    let ctx = self.classifier.context(&e, source, attempt);
                    self.classifier.record(ctx.clone());

                    if !self.classifier.should_retry(&ctx) {
                        return CallReport {
                            outcome: Err(ctx),
                            attempts: attempt,
                            failures,
                            from_cache: false,
                            latency,
                        };
                    }

                    let delay = self.classifier.backoff_delay(&ctx);
                    tracing::info!(
                        source = %source,
                        error_type = %ctx.error_type,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying page fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
