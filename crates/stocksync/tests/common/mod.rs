//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use serde_json::{Value, json};
use stocksync::entity::inventory_record::ActiveModel;
use stocksync::platform::{FetchFilters, Page, PageCursor, PlatformError, StockRecord};
use stocksync::sync::run_log;
use stocksync::{
    InventoryRecord, Marketplace, MarketplaceClient, SyncResult, SyncStatus, connect_and_migrate,
};
use uuid::Uuid;

/// Create an in-memory SQLite database with migrations applied.
pub async fn setup_test_db() -> DatabaseConnection {
    connect_and_migrate("sqlite::memory:")
        .await
        .expect("Failed to create test database")
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn days_ago(days: i64) -> NaiveDate {
    today() - Duration::days(days)
}

/// An inventory row for `product` at warehouse "main", synced now.
pub fn record(
    source: Marketplace,
    product: &str,
    quantity: i64,
    snapshot_date: NaiveDate,
) -> ActiveModel {
    ActiveModel {
        id: Set(Uuid::new_v4()),
        source: Set(source),
        product_id: Set(Some(product.to_string())),
        sku: Set(format!("SKU-{product}")),
        warehouse_id: Set(Some("main".to_string())),
        stock_type: Set("fbo".to_string()),
        quantity: Set(quantity),
        reserved: Set(0),
        snapshot_date: Set(snapshot_date),
        sync_session_id: Set(None),
        created_session_id: Set(None),
        synced_at: Set(Utc::now().fixed_offset()),
    }
}

pub async fn insert_records(db: &DatabaseConnection, rows: Vec<ActiveModel>) {
    for chunk in rows.chunks(50) {
        InventoryRecord::insert_many(chunk.to_vec())
            .exec_without_returning(db)
            .await
            .expect("Failed to insert inventory rows");
    }
}

/// A completed run result for the run log.
pub fn run_result(
    source: Marketplace,
    status: SyncStatus,
    started_at: DateTime<Utc>,
    records: u64,
) -> SyncResult {
    SyncResult {
        source,
        status,
        records_processed: records,
        records_updated: 0,
        records_inserted: records,
        records_failed: 0,
        started_at,
        completed_at: started_at + Duration::seconds(2),
        error_message: (status == SyncStatus::Failed).then(|| "HTTP 503".to_string()),
        api_requests_count: 1,
        session_id: None,
        error: None,
    }
}

/// Insert a finished run and return its session id.
pub async fn record_run(
    db: &DatabaseConnection,
    source: Marketplace,
    status: SyncStatus,
    started_at: DateTime<Utc>,
) -> Uuid {
    let session_id = Uuid::new_v4();
    run_log::record_run(
        db,
        session_id,
        "stocks",
        &run_result(source, status, started_at, 0),
    )
    .await
    .expect("Failed to record run");
    session_id
}

// ─── Fake marketplace ────────────────────────────────────────────────────────

/// In-memory marketplace serving fixed pages, optionally failing once they
/// run out.
pub struct FakeMarketplace {
    marketplace: Marketplace,
    pages: Vec<Vec<Value>>,
    fail_status: Option<u16>,
    calls: AtomicUsize,
}

impl FakeMarketplace {
    pub fn with_pages(marketplace: Marketplace, pages: Vec<Vec<Value>>) -> Self {
        Self {
            marketplace,
            pages,
            fail_status: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(marketplace: Marketplace, status: u16) -> Self {
        Self {
            marketplace,
            pages: Vec::new(),
            fail_status: Some(status),
            calls: AtomicUsize::new(0),
        }
    }

    /// Serve `pages`, then fail every request past the last one.
    pub fn breaking_after(marketplace: Marketplace, pages: Vec<Vec<Value>>, status: u16) -> Self {
        Self {
            marketplace,
            pages,
            fail_status: Some(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn item(product: &str, quantity: i64) -> Value {
    json!({ "product_id": product, "sku": format!("SKU-{product}"), "quantity": quantity })
}

#[async_trait]
impl MarketplaceClient for FakeMarketplace {
    fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    async fn fetch_page(
        &self,
        cursor: Option<&PageCursor>,
        _filters: &FetchFilters,
    ) -> stocksync::platform::Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = cursor.and_then(|c| c.as_str().parse().ok()).unwrap_or(0);
        if let Some(status) = self.fail_status
            && index >= self.pages.len()
        {
            return Err(PlatformError::http(status, "Service Unavailable"));
        }

        let has_more = index + 1 < self.pages.len() || self.fail_status.is_some();
        Ok(Page {
            items: self.pages.get(index).cloned().unwrap_or_default(),
            next_cursor: has_more.then(|| PageCursor::new((index + 1).to_string())),
            has_more,
        })
    }

    fn map_to_records(
        &self,
        item: &Value,
        snapshot_date: NaiveDate,
    ) -> stocksync::platform::Result<Vec<StockRecord>> {
        let sku = item["sku"]
            .as_str()
            .ok_or_else(|| PlatformError::decode("missing sku"))?;
        Ok(vec![StockRecord {
            product_id: item["product_id"].as_str().map(str::to_string),
            sku: sku.to_string(),
            warehouse_id: Some("main".to_string()),
            stock_type: "fbo".to_string(),
            quantity: item["quantity"].as_i64().unwrap_or(0),
            reserved: 0,
            snapshot_date,
        }])
    }
}
