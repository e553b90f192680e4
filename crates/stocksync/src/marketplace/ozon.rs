use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::entity::marketplace::Marketplace;
use crate::http::{HttpRequest, HttpTransport};
use crate::platform::{
    FetchFilters, MarketplaceClient, Page, PageCursor, PlatformError, Result, StockRecord,
};

use super::check_status;

/// Default Ozon Seller API host.
pub const OZON_API_HOST: &str = "https://api-seller.ozon.ru";

const STOCKS_PATH: &str = "/v3/product/info/stocks";

/// Ozon rejects larger pages.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct StocksResponse {
    result: StocksResult,
}

#[derive(Debug, Deserialize)]
struct StocksResult {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    last_id: String,
}

/// One product with its per-scheme stock.
#[derive(Debug, Deserialize)]
struct OzonStockItem {
    product_id: i64,
    offer_id: String,
    #[serde(default)]
    stocks: Vec<OzonStock>,
}

#[derive(Debug, Deserialize)]
struct OzonStock {
    /// Fulfilment scheme, e.g. "fbo" or "fbs".
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    present: i64,
    #[serde(default)]
    reserved: i64,
}

/// Ozon Seller API client.
///
/// Ozon reports stock aggregated per fulfilment scheme, so the scheme name
/// is used both as the stock type and as the warehouse id.
#[derive(Clone)]
pub struct OzonClient {
    transport: Arc<dyn HttpTransport>,
    host: String,
    client_id: String,
    api_key: String,
}

impl OzonClient {
    #[cfg(feature = "marketplaces")]
    pub fn new(config: &super::OzonConfig) -> Result<Self> {
        use crate::http::reqwest_transport::ReqwestTransport;

        let (Some(client_id), Some(api_key)) = (&config.client_id, &config.api_key) else {
            return Err(PlatformError::internal("Ozon client_id and api_key are required"));
        };
        let timeout = config.timeout_secs.unwrap_or(super::DEFAULT_TIMEOUT_SECS);
        let transport = ReqwestTransport::with_timeout(std::time::Duration::from_secs(timeout))?;
        Ok(Self::new_with_transport(
            config.host.as_deref().unwrap_or(OZON_API_HOST),
            client_id,
            api_key,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        host: &str,
        client_id: &str,
        api_key: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            host: host.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn stocks_url(&self) -> String {
        format!("{}{}", self.host, STOCKS_PATH)
    }
}

#[async_trait]
impl MarketplaceClient for OzonClient {
    fn marketplace(&self) -> Marketplace {
        Marketplace::Ozon
    }

    async fn fetch_page(&self, cursor: Option<&PageCursor>, filters: &FetchFilters) -> Result<Page> {
        let limit = filters.limit.clamp(1, MAX_PAGE_SIZE);
        let payload = json!({
            "filter": { "visibility": "ALL" },
            "last_id": cursor.map(PageCursor::as_str).unwrap_or_default(),
            "limit": limit,
        });
        let request = HttpRequest::post_json(self.stocks_url(), &payload)
            .header("Client-Id", &self.client_id)
            .header("Api-Key", &self.api_key);

        let response = check_status(self.transport.send(request).await?)?;
        let body: StocksResponse = serde_json::from_slice(&response.body)?;

        let StocksResult { items, last_id } = body.result;
        let has_more = items.len() >= limit && !last_id.is_empty();
        tracing::debug!(items = items.len(), has_more, "Fetched Ozon stocks page");

        Ok(Page {
            next_cursor: has_more.then(|| PageCursor::new(last_id)),
            items,
            has_more,
        })
    }

    fn map_to_records(&self, item: &Value, snapshot_date: NaiveDate) -> Result<Vec<StockRecord>> {
        let item = OzonStockItem::deserialize(item)?;
        if item.offer_id.trim().is_empty() {
            return Err(PlatformError::decode(format!(
                "product {} has no offer_id",
                item.product_id
            )));
        }

        Ok(item
            .stocks
            .into_iter()
            .map(|stock| StockRecord {
                product_id: Some(item.product_id.to_string()),
                sku: item.offer_id.clone(),
                warehouse_id: Some(stock.kind.clone()),
                stock_type: stock.kind,
                quantity: stock.present,
                reserved: stock.reserved,
                snapshot_date,
            })
            .collect())
    }
}
