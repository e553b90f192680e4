//! Ozon and Wildberries stock clients.
//!
//! Both implement [`MarketplaceClient`](crate::platform::MarketplaceClient)
//! over an [`HttpTransport`](crate::http::HttpTransport): one HTTP call per
//! page, no retries of their own.
//!
//! # Module Structure
//!
//! - [`ozon`] - Seller API product stocks (`last_id` pagination)
//! - [`wildberries`] - Statistics API supplier stocks (`dateFrom` pagination)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::HttpResponse;
use crate::platform::{PlatformError, Result};

pub mod ozon;
pub mod wildberries;

pub use ozon::{OZON_API_HOST, OzonClient};
pub use wildberries::{WB_STATISTICS_HOST, WildberriesClient};

/// Default request timeout for marketplace calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Ozon seller credentials and endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OzonConfig {
    pub client_id: Option<String>,
    pub api_key: Option<String>,
    /// Overrides [`OZON_API_HOST`].
    pub host: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl OzonConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.as_deref().is_some_and(|s| !s.is_empty())
            && self.api_key.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Wildberries statistics token and endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WildberriesConfig {
    pub api_key: Option<String>,
    /// Overrides [`WB_STATISTICS_HOST`].
    pub host: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl WildberriesConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Parse a `Retry-After` header given in whole seconds.
fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a non-2xx response into a [`PlatformError::Http`].
pub(crate) fn check_status(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let body = String::from_utf8_lossy(&response.body);
    let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
    if message.trim().is_empty() {
        message = format!("status {}", response.status);
    }
    Err(PlatformError::Http {
        status: response.status,
        message,
        retry_after: retry_after(&response),
    })
}
