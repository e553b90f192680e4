use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use crate::entity::marketplace::Marketplace;
use crate::http::{HttpRequest, HttpTransport};
use crate::platform::{
    FetchFilters, MarketplaceClient, Page, PageCursor, PlatformError, Result, StockRecord,
};

use super::check_status;

/// Default Wildberries statistics API host.
pub const WB_STATISTICS_HOST: &str = "https://statistics-api.wildberries.ru";

const STOCKS_PATH: &str = "/api/v1/supplier/stocks";

/// Earliest `dateFrom`; asking from here returns every stock row.
const FULL_SNAPSHOT_FROM: &str = "2019-06-20T00:00:00";

/// The API returns at most this many rows per call.
const MAX_ROWS_PER_CALL: usize = 60_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WbStockRow {
    last_change_date: Option<String>,
    warehouse_name: Option<String>,
    supplier_article: Option<String>,
    nm_id: Option<i64>,
    barcode: Option<String>,
    #[serde(default)]
    quantity: i64,
    #[serde(default)]
    in_way_to_client: i64,
}

/// Wildberries statistics API client.
///
/// The stocks endpoint pages by `dateFrom`: the next call starts from the
/// `lastChangeDate` of the last row returned. Rows are keyed by barcode
/// (one per size), falling back to the article number.
#[derive(Clone)]
pub struct WildberriesClient {
    transport: Arc<dyn HttpTransport>,
    host: String,
    api_key: String,
    /// Rows per call that mean "there may be more".
    page_rows: usize,
}

impl WildberriesClient {
    #[cfg(feature = "marketplaces")]
    pub fn new(config: &super::WildberriesConfig) -> Result<Self> {
        use crate::http::reqwest_transport::ReqwestTransport;

        let Some(api_key) = &config.api_key else {
            return Err(PlatformError::internal("Wildberries api_key is required"));
        };
        let timeout = config.timeout_secs.unwrap_or(super::DEFAULT_TIMEOUT_SECS);
        let transport = ReqwestTransport::with_timeout(std::time::Duration::from_secs(timeout))?;
        Ok(Self::new_with_transport(
            config.host.as_deref().unwrap_or(WB_STATISTICS_HOST),
            api_key,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(host: &str, api_key: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            page_rows: MAX_ROWS_PER_CALL,
        }
    }

    #[must_use]
    pub fn with_page_rows(mut self, rows: usize) -> Self {
        self.page_rows = rows.max(1);
        self
    }

    fn stocks_url(&self, date_from: &str) -> String {
        format!("{}{}?dateFrom={}", self.host, STOCKS_PATH, date_from)
    }
}

#[async_trait]
impl MarketplaceClient for WildberriesClient {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Wildberries
    }

    async fn fetch_page(&self, cursor: Option<&PageCursor>, filters: &FetchFilters) -> Result<Page> {
        let date_from = match (cursor, filters.changed_since) {
            (Some(cursor), _) => cursor.as_str().to_string(),
            (None, Some(since)) => since.format("%Y-%m-%dT%H:%M:%S").to_string(),
            (None, None) => FULL_SNAPSHOT_FROM.to_string(),
        };
        let request =
            HttpRequest::get(self.stocks_url(&date_from)).header("Authorization", &self.api_key);

        let response = check_status(self.transport.send(request).await?)?;
        let items: Vec<Value> = if response.body.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(&response.body)?
        };

        let last_change = items
            .last()
            .and_then(|row| row.get("lastChangeDate"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let has_more = items.len() >= self.page_rows && last_change.is_some();
        tracing::debug!(items = items.len(), has_more, "Fetched Wildberries stocks page");

        Ok(Page {
            items,
            next_cursor: if has_more {
                last_change.map(PageCursor::new)
            } else {
                None
            },
            has_more,
        })
    }

    fn map_to_records(&self, item: &Value, snapshot_date: NaiveDate) -> Result<Vec<StockRecord>> {
        let row = WbStockRow::deserialize(item)?;

        let product_id = row
            .barcode
            .filter(|b| !b.trim().is_empty())
            .or_else(|| row.nm_id.map(|id| id.to_string()));
        let sku = row
            .supplier_article
            .filter(|a| !a.trim().is_empty())
            .or_else(|| row.nm_id.map(|id| id.to_string()))
            .ok_or_else(|| PlatformError::decode("stock row has no article or nmId"))?;

        tracing::trace!(changed = ?row.last_change_date, sku = %sku, "Mapped Wildberries row");

        Ok(vec![StockRecord {
            product_id,
            sku,
            warehouse_id: row.warehouse_name,
            stock_type: "fbo".to_string(),
            quantity: row.quantity,
            reserved: row.in_way_to_client,
            snapshot_date,
        }])
    }
}
