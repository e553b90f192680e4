use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::inventory_record::{ActiveModel as InventoryRecordActiveModel, NaturalKey};
use crate::entity::marketplace::Marketplace;
use crate::request_cache::CacheType;

use super::errors::Result;

/// Opaque pagination cursor returned by a marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(pub String);

impl PageCursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of raw marketplace items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

impl Page {
    /// A terminal page with no items.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Filters applied to a page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFilters {
    /// Requested page size (clients clamp to their own API maximum).
    pub limit: usize,
    /// Only return items changed since this instant, where supported.
    pub changed_since: Option<DateTime<Utc>>,
}

impl Default for FetchFilters {
    fn default() -> Self {
        Self {
            limit: 1000,
            changed_since: None,
        }
    }
}

/// A normalized stock record, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: Option<String>,
    pub sku: String,
    pub warehouse_id: Option<String>,
    pub stock_type: String,
    pub quantity: i64,
    pub reserved: i64,
    pub snapshot_date: NaiveDate,
}

impl StockRecord {
    /// Natural key of this record within its source.
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            product_id: self.product_id.clone(),
            warehouse_id: self.warehouse_id.clone(),
            stock_type: self.stock_type.clone(),
            snapshot_date: self.snapshot_date,
        }
    }

    /// Convert to a fresh ActiveModel for insertion.
    pub fn to_active_model(
        &self,
        source: Marketplace,
        session_id: Uuid,
        synced_at: DateTime<FixedOffset>,
    ) -> InventoryRecordActiveModel {
        InventoryRecordActiveModel {
            id: Set(Uuid::new_v4()),
            source: Set(source),
            product_id: Set(self.product_id.clone()),
            sku: Set(self.sku.clone()),
            warehouse_id: Set(self.warehouse_id.clone()),
            stock_type: Set(self.stock_type.clone()),
            quantity: Set(self.quantity),
            reserved: Set(self.reserved),
            snapshot_date: Set(self.snapshot_date),
            sync_session_id: Set(Some(session_id)),
            created_session_id: Set(Some(session_id)),
            synced_at: Set(synced_at),
        }
    }
}

/// Per-marketplace capability used by the sync engine.
///
/// Implementations perform exactly one HTTP call per `fetch_page` and never
/// retry on their own; retries, caching and rate limiting are applied by
/// [`ResilientClient`](crate::resilience::ResilientClient).
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Which marketplace this client talks to.
    fn marketplace(&self) -> Marketplace;

    /// Kind of data this client synchronizes, used in run logs and batch keys.
    fn task_type(&self) -> &'static str {
        "stocks"
    }

    /// Cache bucket that page responses are stored under.
    fn cache_type(&self) -> CacheType {
        CacheType::StockLevels
    }

    /// Fetch one page of raw items.
    async fn fetch_page(&self, cursor: Option<&PageCursor>, filters: &FetchFilters)
    -> Result<Page>;

    /// Normalize one raw item into zero or more stock records.
    fn map_to_records(&self, item: &Value, snapshot_date: NaiveDate) -> Result<Vec<StockRecord>>;
}
