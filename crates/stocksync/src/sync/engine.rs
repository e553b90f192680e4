//! The per-source pagination loop.
//!
//! One run walks every page of a marketplace through a [`ResilientClient`],
//! normalizes the items and hands them to an [`InventorySink`] in chunks sized
//! by the [`AdaptiveBatcher`]. Observed success rate and latency are fed back
//! into the batcher when the run ends.

use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::inventory::{InventorySink, PersistOutcome};
use crate::platform::{AdaptiveBatcher, FetchFilters, PageCursor, op_key};
use crate::resilience::{ErrorContext, ResilientClient};

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{SyncOptions, SyncResult, SyncStatus};

/// Collaborators for one run.
pub struct EngineContext<'a> {
    pub client: &'a ResilientClient,
    pub sink: &'a dyn InventorySink,
    pub batcher: &'a AdaptiveBatcher,
    pub on_progress: Option<&'a ProgressCallback>,
}

/// Synchronize one source under `session_id`.
///
/// Never returns an error. A marketplace call that fails after the client's
/// own retries ends the run with `Failed` and the classified context
/// attached, even when earlier pages were persisted: those rows stay tagged
/// with `session_id` so the run can be retried or rolled back. `Partial` is
/// reserved for runs that walked every page but had records rejected.
pub async fn sync_source(
    ctx: &EngineContext<'_>,
    session_id: Uuid,
    options: &SyncOptions,
) -> SyncResult {
    let started_at = Utc::now();
    let source = ctx.client.marketplace();
    let task_type = ctx.client.inner().task_type();
    let snapshot_date = options.snapshot_date.unwrap_or_else(|| started_at.date_naive());
    let key = op_key(source, task_type);

    let limit = ctx.batcher.batch_size(&key).max(1);
    let filters = FetchFilters {
        limit,
        changed_since: None,
    };

    let mut cursor: Option<PageCursor> = None;
    let mut pages = 0u32;
    let mut attempts = 0u32;
    let mut call_failures = 0u32;
    let mut latency = Duration::ZERO;
    let mut processed = 0u64;
    let mut persisted = PersistOutcome::default();
    let mut fetch_error: Option<ErrorContext> = None;
    let mut persist_error: Option<String> = None;

    tracing::info!(source = %source, session = %session_id, batch_size = limit, "Starting sync");

    loop {
        if pages as usize >= options.max_pages {
            tracing::warn!(source = %source, pages, "Reached page limit, stopping");
            emit(
                ctx.on_progress,
                SyncProgress::Warning {
                    message: format!("{source}: stopped after {pages} pages"),
                },
            );
            break;
        }

        let report = ctx.client.fetch_page(cursor.as_ref(), &filters).await;
        attempts += report.attempts;
        call_failures += report.failures;
        latency += report.latency;

        let page = match report.outcome {
            Ok(page) => page,
            Err(err) => {
                fetch_error = Some(err);
                break;
            }
        };
        pages += 1;

        emit(
            ctx.on_progress,
            SyncProgress::FetchedPage {
                source,
                page: pages,
                count: page.items.len(),
                from_cache: report.from_cache,
            },
        );

        let mut records = Vec::with_capacity(page.items.len());
        for item in &page.items {
            match ctx.client.inner().map_to_records(item, snapshot_date) {
                Ok(mapped) => records.extend(mapped),
                Err(e) => {
                    tracing::debug!(source = %source, error = %e, "Skipping unmappable item");
                    processed += 1;
                    persisted.failed += 1;
                }
            }
        }
        processed += records.len() as u64;

        for chunk in records.chunks(limit) {
            match ctx.sink.persist_batch(chunk, source, session_id).await {
                Ok(outcome) => {
                    persisted += outcome;
                    emit(
                        ctx.on_progress,
                        SyncProgress::PersistedBatch {
                            source,
                            inserted: outcome.inserted,
                            updated: outcome.updated,
                            failed: outcome.failed,
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(source = %source, count = chunk.len(), error = %e, "Failed to persist batch");
                    persisted.failed += chunk.len() as u64;
                    persist_error = Some(e.to_string());
                }
            }
        }

        let next = match page.next_cursor {
            Some(next) if page.has_more => next,
            _ => break,
        };
        if cursor.as_ref() == Some(&next) {
            tracing::warn!(source = %source, cursor = %next, "Cursor did not advance, stopping");
            break;
        }
        cursor = Some(next);
    }

    if attempts > 0 {
        let success_rate = f64::from(attempts - call_failures) / f64::from(attempts);
        ctx.batcher
            .adapt(&key, success_rate, latency / attempts);
    }

    let status = match &fetch_error {
        Some(_) => SyncStatus::Failed,
        None if persisted.failed > 0 => SyncStatus::Partial,
        None => SyncStatus::Success,
    };

    let error_message = fetch_error
        .as_ref()
        .map(ToString::to_string)
        .or(persist_error)
        .or_else(|| {
            (persisted.failed > 0).then(|| format!("{} records rejected", persisted.failed))
        });

    let result = SyncResult {
        source,
        status,
        records_processed: processed,
        records_updated: persisted.updated,
        records_inserted: persisted.inserted,
        records_failed: persisted.failed,
        started_at,
        completed_at: Utc::now(),
        error_message,
        api_requests_count: attempts,
        session_id: Some(session_id),
        error: fetch_error,
    };

    tracing::info!(
        source = %source,
        status = %result.status,
        pages,
        processed = result.records_processed,
        inserted = result.records_inserted,
        updated = result.records_updated,
        failed = result.records_failed,
        api_requests = result.api_requests_count,
        "Sync finished"
    );

    result
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::{Value, json};

    use super::*;
    use crate::entity::marketplace::Marketplace;
    use crate::inventory::{self, validate_record};
    use crate::platform::{
        MarketplaceClient, Page, PlatformError, RateLimitSettings, RateLimiter, StockRecord,
    };
    use crate::request_cache::{CacheConfig, RequestCache};
    use crate::resilience::{ErrorClassifier, ErrorType, RetryPolicy};

    /// Serves pages keyed by cursor ("" for the first page).
    struct PagedClient {
        pages: Mutex<HashMap<String, VecDeque<crate::platform::Result<Page>>>>,
    }

    impl PagedClient {
        fn new(pages: Vec<(&str, crate::platform::Result<Page>)>) -> Arc<Self> {
            let mut map: HashMap<String, VecDeque<_>> = HashMap::new();
            for (cursor, page) in pages {
                map.entry(cursor.to_string()).or_default().push_back(page);
            }
            Arc::new(Self {
                pages: Mutex::new(map),
            })
        }
    }

    #[async_trait]
    impl MarketplaceClient for PagedClient {
        fn marketplace(&self) -> Marketplace {
            Marketplace::Wildberries
        }

        async fn fetch_page(
            &self,
            cursor: Option<&PageCursor>,
            _filters: &FetchFilters,
        ) -> crate::platform::Result<Page> {
            let key = cursor.map_or("", PageCursor::as_str).to_string();
            self.pages
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Ok(Page::empty()))
        }

        fn map_to_records(
            &self,
            item: &Value,
            snapshot_date: NaiveDate,
        ) -> crate::platform::Result<Vec<StockRecord>> {
            let product = item["product"]
                .as_str()
                .ok_or_else(|| PlatformError::decode("missing product"))?;
            Ok(vec![StockRecord {
                product_id: Some(product.to_string()),
                sku: format!("SKU-{product}"),
                warehouse_id: Some("wh".to_string()),
                stock_type: "fbo".to_string(),
                quantity: item["qty"].as_i64().unwrap_or(0),
                reserved: 0,
                snapshot_date,
            }])
        }
    }

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<StockRecord>>,
    }

    #[async_trait]
    impl InventorySink for MemorySink {
        async fn persist_batch(
            &self,
            records: &[StockRecord],
            _source: Marketplace,
            _session_id: Uuid,
        ) -> inventory::Result<PersistOutcome> {
            let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
            let mut outcome = PersistOutcome::default();
            for record in records {
                if validate_record(record).is_some() {
                    outcome.failed += 1;
                } else {
                    rows.push(record.clone());
                    outcome.inserted += 1;
                }
            }
            Ok(outcome)
        }
    }

    fn page(items: Vec<Value>, next: Option<&str>) -> Page {
        Page {
            items,
            next_cursor: next.map(PageCursor::new),
            has_more: next.is_some(),
        }
    }

    fn resilient(client: Arc<PagedClient>) -> ResilientClient {
        ResilientClient::new(
            client,
            Arc::new(RequestCache::new(CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            })),
            Arc::new(RateLimiter::new(&RateLimitSettings::default())),
            Arc::new(ErrorClassifier::new(RetryPolicy {
                jitter: false,
                ..RetryPolicy::default()
            })),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn walks_all_pages_and_persists_records() {
        let client = PagedClient::new(vec![
            (
                "",
                Ok(page(
                    vec![json!({"product": "a", "qty": 1}), json!({"product": "b", "qty": 2})],
                    Some("c1"),
                )),
            ),
            ("c1", Ok(page(vec![json!({"product": "c", "qty": 3})], None))),
        ]);
        let resilient = resilient(client);
        let sink = MemorySink::default();
        let batcher = AdaptiveBatcher::default();
        let ctx = EngineContext {
            client: &resilient,
            sink: &sink,
            batcher: &batcher,
            on_progress: None,
        };

        let result = sync_source(&ctx, Uuid::new_v4(), &SyncOptions::default()).await;

        assert_eq!(result.status, SyncStatus::Success);
        assert_eq!(result.records_processed, 3);
        assert_eq!(result.records_inserted, 3);
        assert_eq!(result.api_requests_count, 2);
        assert_eq!(sink.rows.lock().unwrap_or_else(|e| e.into_inner()).len(), 3);
        // Healthy fast calls grow the batch for next time.
        assert_eq!(batcher.batch_size("wildberries:stocks"), 1200);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_and_unmappable_items_make_the_run_partial() {
        let client = PagedClient::new(vec![(
            "",
            Ok(page(
                vec![
                    json!({"product": "a", "qty": 1}),
                    json!({"product": "b", "qty": -4}),
                    json!({"no_product": true}),
                ],
                None,
            )),
        )]);
        let resilient = resilient(client);
        let sink = MemorySink::default();
        let batcher = AdaptiveBatcher::default();
        let ctx = EngineContext {
            client: &resilient,
            sink: &sink,
            batcher: &batcher,
            on_progress: None,
        };

        let result = sync_source(&ctx, Uuid::new_v4(), &SyncOptions::default()).await;

        assert_eq!(result.status, SyncStatus::Partial);
        assert_eq!(result.records_processed, 3);
        assert_eq!(result.records_inserted, 1);
        assert_eq!(result.records_failed, 2);
        assert!(result.records_inserted + result.records_failed <= result.records_processed);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_on_first_page_fails_the_run() {
        let client = PagedClient::new(vec![("", Err(PlatformError::http(403, "forbidden")))]);
        let resilient = resilient(client);
        let sink = MemorySink::default();
        let batcher = AdaptiveBatcher::default();
        let ctx = EngineContext {
            client: &resilient,
            sink: &sink,
            batcher: &batcher,
            on_progress: None,
        };

        let result = sync_source(&ctx, Uuid::new_v4(), &SyncOptions::default()).await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(
            result.error.as_ref().map(|e| e.error_type),
            Some(ErrorType::ApiAuthError)
        );
        assert!(result.error_message.is_some());
        // A fully failed call shrinks the batch.
        assert_eq!(batcher.batch_size("wildberries:stocks"), 800);
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_first_page_fails_the_run() {
        let client = PagedClient::new(vec![
            ("", Ok(page(vec![json!({"product": "a", "qty": 1})], Some("c1")))),
            ("c1", Err(PlatformError::http(400, "bad cursor"))),
        ]);
        let resilient = resilient(client);
        let sink = MemorySink::default();
        let batcher = AdaptiveBatcher::default();
        let ctx = EngineContext {
            client: &resilient,
            sink: &sink,
            batcher: &batcher,
            on_progress: None,
        };

        let session_id = Uuid::new_v4();
        let result = sync_source(&ctx, session_id, &SyncOptions::default()).await;

        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(
            result.error.as_ref().map(|e| e.error_type),
            Some(ErrorType::ApiValidationError)
        );
        // Rows from the first page stay attributed to the run.
        assert_eq!(result.records_inserted, 1);
        assert_eq!(result.session_id, Some(session_id));
    }

    #[tokio::test(start_paused = true)]
    async fn page_limit_stops_runaway_pagination() {
        let client = PagedClient::new(vec![
            ("", Ok(page(vec![json!({"product": "a"})], Some("c1")))),
            ("c1", Ok(page(vec![json!({"product": "b"})], Some("c2")))),
            ("c2", Ok(page(vec![json!({"product": "c"})], Some("c3")))),
        ]);
        let resilient = resilient(client);
        let sink = MemorySink::default();
        let batcher = AdaptiveBatcher::default();
        let ctx = EngineContext {
            client: &resilient,
            sink: &sink,
            batcher: &batcher,
            on_progress: None,
        };
        let options = SyncOptions {
            max_pages: 2,
            ..SyncOptions::default()
        };

        let result = sync_source(&ctx, Uuid::new_v4(), &options).await;

        assert_eq!(result.records_processed, 2);
        assert_eq!(result.api_requests_count, 2);
    }
}
