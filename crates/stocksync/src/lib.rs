//! Stocksync - resilient marketplace inventory synchronization.
//!
//! This library pulls stock snapshots from Ozon and Wildberries into a
//! relational store. Requests go through a cache, a per-marketplace rate
//! limiter and an error classifier with retry; tasks run on a priority
//! scheduler with one running task per marketplace; failed runs can be rolled
//! back or replaced with cached or estimated data; a health monitor reports on
//! what was stored.
//!
//! # Features
//!
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to automatically run migrations on connection.
//! - `marketplaces` - Enables the reqwest-backed HTTP transport used by
//!   [`marketplace::OzonClient::new`] and [`marketplace::WildberriesClient::new`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stocksync::{connect_and_migrate, Marketplace, SyncService, TaskPriority};
//! use stocksync::marketplace::{OzonClient, OzonConfig};
//!
//! let db = connect_and_migrate("sqlite://stocksync.db?mode=rwc").await?;
//! let ozon = OzonClient::new(&OzonConfig::default())?;
//!
//! let service = SyncService::builder(db).client(Arc::new(ozon)).build()?;
//! service.start().await?;
//!
//! let task = service.run_sync(Marketplace::Ozon, TaskPriority::High);
//! let result = service.wait_for(task).await;
//! service.shutdown().await;
//! ```

pub mod db;
pub mod entity;
pub mod fallback;
pub mod health;
pub mod http;
pub mod inventory;
pub mod marketplace;
pub mod platform;
pub mod recovery;
pub mod request_cache;
pub mod resilience;
pub mod retry;
pub mod service;
pub mod status;
pub mod sync;
pub mod window;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use fallback::{FallbackConfig, FallbackManager};
pub use health::{HealthMonitor, HealthReport, HealthStatus, HealthThresholds};
pub use http::{HttpError, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
pub use inventory::{DbInventorySink, InventoryError, InventorySink, PersistOutcome};
pub use platform::{
    FetchFilters, MarketplaceClient, Page, PageCursor, PlatformError, StockRecord, rate_limits,
};
pub use recovery::{RecoveryConfig, RecoveryManager};
pub use request_cache::{CacheConfig, CacheType, RequestCache};
pub use resilience::{ErrorClassifier, ErrorContext, ErrorType, ResilientClient, RetryPolicy};
pub use service::{ServiceConfig, SyncService, SyncServiceBuilder, SyncServiceError};
pub use status::OperationStatus;
pub use sync::{
    SyncOptions, SyncProgress, SyncResult, SyncStatus, TaskId, TaskPriority, TaskStatus,
};
