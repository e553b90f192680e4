//! Configuration file support for stocksync.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `STOCKSYNC_`, nested keys joined by `__`,
//!    e.g., `STOCKSYNC_OZON__API_KEY`)
//! 3. Config file (./stocksync.toml, then ~/.config/stocksync/config.toml)
//! 4. Built-in defaults
//!
//! The database URL defaults to `sqlite://~/.local/state/stocksync/stocksync.db` on Linux
//! (using the XDG state directory) if not explicitly configured.
//!
//! Example config file:
//! ```toml
//! [database]
//! url = "postgres://stocksync@localhost/stocksync"
//!
//! [ozon]
//! client_id = "123456"
//! api_key = "..."  # or use STOCKSYNC_OZON__API_KEY
//!
//! [wildberries]
//! api_key = "..."  # or use STOCKSYNC_WILDBERRIES__API_KEY
//!
//! [scheduler]
//! max_workers = 4
//! max_concurrent_marketplaces = 2
//!
//! [rate_limits.ozon]
//! requests_per_second = 10
//! requests_per_minute = 500
//! requests_per_hour = 20000
//!
//! [health]
//! freshness_warning_hours = 6.0
//! ```

use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use stocksync::marketplace::{OzonConfig, WildberriesConfig};
use stocksync::platform::{BatchSizeConfig, RateLimitSettings};
use stocksync::retry::RetryConfig;
use stocksync::sync::SchedulerConfig;
use stocksync::{
    CacheConfig, FallbackConfig, HealthThresholds, RecoveryConfig, RetryPolicy, ServiceConfig,
};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ozon: OzonConfig,
    pub wildberries: WildberriesConfig,
    pub cache: CacheConfig,
    /// Retry policy for marketplace calls.
    pub retry: RetryPolicy,
    pub scheduler: SchedulerConfig,
    pub health: HealthThresholds,
    pub recovery: RecoveryConfig,
    pub fallback: FallbackConfig,
    pub batching: BatchSizeConfig,
    pub rate_limits: RateLimitSettings,
    /// Backoff for transient database errors while persisting.
    pub persistence_retry: RetryConfig,
}

/// Database configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL.
    /// Supports sqlite://, postgres:// and mysql:// schemes.
    /// Defaults to `sqlite://~/.local/state/stocksync/stocksync.db` if not specified.
    pub url: Option<String>,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/stocksync/config.toml)
    /// 3. Local config file (./stocksync.toml)
    /// 4. Environment variables with STOCKSYNC_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(proj_dirs) = ProjectDirs::from("", "", "stocksync") {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!("Loading config from {:?}", xdg_config);
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let local_config = PathBuf::from("stocksync.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./stocksync.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // STOCKSYNC_DATABASE__URL -> database.url
        builder = builder.add_source(
            Environment::with_prefix("STOCKSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// Get the database URL, falling back to the default state directory path.
    ///
    /// The `mode=rwc` parameter creates the SQLite file if it doesn't exist.
    pub fn database_url(&self) -> Option<String> {
        self.database.url.clone().or_else(|| {
            Self::default_state_dir().map(|state_dir| {
                let db_path = state_dir.join("stocksync.db");
                format!("sqlite://{}?mode=rwc", db_path.display())
            })
        })
    }

    /// Component configuration handed to the sync service.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            rate_limits: self.rate_limits.clone(),
            batching: self.batching,
            scheduler: self.scheduler.clone(),
            health: self.health.clone(),
            recovery: self.recovery.clone(),
            fallback: self.fallback.clone(),
            persistence_retry: self.persistence_retry.clone(),
        }
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/stocksync` or `~/.local/state/stocksync`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stocksync").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
