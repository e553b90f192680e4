//! Marketplace-agnostic capability traits and request plumbing.
//!
//! A [`MarketplaceClient`] knows how to fetch one page of raw stock items and
//! how to normalize an item into [`StockRecord`]s. Everything around that call
//! (admission control, batch sizing, error types) lives here too, so the
//! scheduler never switches on marketplace names.

mod batching;
mod errors;
mod rate_limit;
mod types;

pub use batching::{AdaptiveBatcher, BatchSizeConfig, op_key};
pub use errors::{PlatformError, Result, short_error_message};
pub use rate_limit::{RateLimitConfig, RateLimitSettings, RateLimiter, rate_limits};
pub use types::{FetchFilters, MarketplaceClient, Page, PageCursor, StockRecord};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_platform_error_http_display_includes_status() {
        let err = PlatformError::http(503, "Service Unavailable");
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service Unavailable"));
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_platform_error_rate_limited_carries_retry_after() {
        let err = PlatformError::rate_limited(Some(Duration::from_secs(7)));
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_platform_error_network() {
        let err = PlatformError::network("connection refused");
        assert!(err.to_string().contains("Network error"));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_short_error_message_takes_first_line() {
        let err = PlatformError::decode("bad json\nat line 3");
        assert_eq!(short_error_message(&err), "Decode error: bad json");
    }
}
