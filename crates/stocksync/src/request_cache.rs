//! TTL and size-bounded cache for marketplace responses.
//!
//! Entries are addressed by a [`CacheKey`]: a cache type plus sorted request
//! parameters, fingerprinted with SHA-256. The cache lives in memory; a
//! snapshot can be loaded from and flushed to the `cache_entries` table so
//! warm data survives restarts.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::entity::cache_entry::{
    ActiveModel as CacheEntryActiveModel, Column as CacheEntryColumn, Entity as CacheEntryTable,
};

/// Rows per INSERT when flushing a snapshot (8 columns, well under SQLite's bind limit).
const FLUSH_CHUNK: usize = 100;

/// Errors that can occur while loading or flushing a cache snapshot.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// Stored parameters could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Kind of cached response; each kind has its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    ProductInfo,
    StockLevels,
    Warehouses,
    Generic,
}

impl CacheType {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheType::ProductInfo => "product_info",
            CacheType::StockLevels => "stock_levels",
            CacheType::Warehouses => "warehouses",
            CacheType::Generic => "generic",
        }
    }

    /// TTL used when `set` is called without an explicit one.
    pub fn default_ttl(self) -> Duration {
        match self {
            CacheType::ProductInfo => Duration::from_secs(60 * 60),
            CacheType::StockLevels => Duration::from_secs(5 * 60),
            CacheType::Warehouses => Duration::from_secs(24 * 60 * 60),
            CacheType::Generic => Duration::from_secs(15 * 60),
        }
    }
}

impl FromStr for CacheType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "product_info" => Ok(CacheType::ProductInfo),
            "stock_levels" => Ok(CacheType::StockLevels),
            "warehouses" => Ok(CacheType::Warehouses),
            "generic" => Ok(CacheType::Generic),
            other => Err(format!("unknown cache type: {other}")),
        }
    }
}

/// Semantic request key: a cache type plus sorted parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    cache_type: CacheType,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(cache_type: CacheType) -> Self {
        Self {
            cache_type,
            params: BTreeMap::new(),
        }
    }

    /// Add a key parameter. Parameter order never affects the fingerprint.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    pub fn cache_type(&self) -> CacheType {
        self.cache_type
    }

    /// SHA-256 hex digest of the canonical rendering.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.cache_type, &self.params)
    }
}

fn fingerprint_of(cache_type: CacheType, params: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cache_type.as_str().as_bytes());
    for (k, v) in params {
        hasher.update(b"\x1f");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of live entries.
    pub max_size: usize,
    /// When false, `get` always misses and `set` is a no-op.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            enabled: true,
        }
    }
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    cache_type: CacheType,
    params: BTreeMap<String, String>,
    data: Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_count: u64,
    last_accessed: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn recency(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl CacheInner {
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - self.entries.len();
        self.stats.expirations += removed as u64;
        removed
    }

    fn evict_least_used(&mut self) -> usize {
        let mut ranked: Vec<(u64, DateTime<Utc>, String)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.access_count, e.recency(), k.clone()))
            .collect();
        ranked.sort();

        let count = (ranked.len() / 5).max(1).min(ranked.len());
        for (_, _, key) in ranked.into_iter().take(count) {
            self.entries.remove(&key);
        }
        self.stats.evictions += count as u64;
        count
    }
}

/// In-memory response cache with TTL expiry and least-used eviction.
#[derive(Debug)]
pub struct RequestCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl RequestCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a key. Expired entries are deleted and count as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Value> {
        if !self.config.enabled {
            return None;
        }

        let fingerprint = key.fingerprint();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let expired = match inner.entries.get_mut(&fingerprint) {
            None => {
                inner.stats.misses += 1;
                return None;
            }
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed = Some(now);
                let data = entry.data.clone();
                inner.stats.hits += 1;
                return Some(data);
            }
        };

        if expired {
            inner.entries.remove(&fingerprint);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
        }
        None
    }

    /// Store a value. `ttl = None` uses the cache type's default TTL.
    pub fn set(&self, key: &CacheKey, data: Value, ttl: Option<Duration>) {
        self.set_at(key, data, ttl, Utc::now());
    }

    fn set_at(&self, key: &CacheKey, data: Value, ttl: Option<Duration>, now: DateTime<Utc>) {
        if !self.config.enabled || self.config.max_size == 0 {
            return;
        }

        let mut ttl = ttl.unwrap_or_else(|| key.cache_type.default_ttl());
        if ttl < Duration::from_secs(1) {
            ttl = Duration::from_secs(1);
        }
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let fingerprint = key.fingerprint();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !inner.entries.contains_key(&fingerprint) && inner.entries.len() >= self.config.max_size
        {
            let expired = inner.purge_expired(now);
            let mut evicted = 0;
            if inner.entries.len() >= self.config.max_size {
                evicted = inner.evict_least_used();
            }
            tracing::debug!(expired, evicted, "Enforced request cache capacity");
        }

        inner.entries.insert(
            fingerprint,
            CacheEntry {
                cache_type: key.cache_type,
                params: key.params.clone(),
                data,
                created_at: now,
                expires_at,
                access_count: 0,
                last_accessed: None,
            },
        );
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.remove(&key.fingerprint()).is_some()
    }

    /// Remove every entry (counters are kept).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            size: inner.entries.len(),
            ..inner.stats
        }
    }

    /// Load unexpired entries from the `cache_entries` table.
    ///
    /// The most frequently accessed rows win when the table holds more than
    /// `max_size` entries. Returns the number of entries loaded.
    pub async fn load_snapshot<C: ConnectionTrait>(&self, db: &C) -> Result<usize> {
        if !self.config.enabled {
            return Ok(0);
        }

        let now = Utc::now();
        let rows = CacheEntryTable::find()
            .filter(CacheEntryColumn::ExpiresAt.gt(now.fixed_offset()))
            .order_by_desc(CacheEntryColumn::AccessCount)
            .all(db)
            .await?;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut loaded = 0;
        for row in rows {
            if inner.entries.len() >= self.config.max_size {
                break;
            }
            let Ok(cache_type) = row.cache_type.parse::<CacheType>() else {
                tracing::warn!(cache_type = %row.cache_type, "Skipping cache row with unknown type");
                continue;
            };
            let params: BTreeMap<String, String> = match serde_json::from_value(row.params) {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!(fingerprint = %row.fingerprint, error = %e, "Skipping malformed cache row");
                    continue;
                }
            };

            // Re-derive the fingerprint so a changed key scheme never serves stale rows.
            let fingerprint = fingerprint_of(cache_type, &params);
            inner.entries.insert(
                fingerprint,
                CacheEntry {
                    cache_type,
                    params,
                    data: row.data,
                    created_at: row.created_at.with_timezone(&Utc),
                    expires_at: row.expires_at.with_timezone(&Utc),
                    access_count: row.access_count.max(0) as u64,
                    last_accessed: row.last_accessed.map(|t| t.with_timezone(&Utc)),
                },
            );
            loaded += 1;
        }

        tracing::debug!(loaded, "Loaded request cache snapshot");
        Ok(loaded)
    }

    /// Replace the `cache_entries` table with the live entries, in one transaction.
    ///
    /// Returns the number of entries written.
    pub async fn flush_snapshot(&self, db: &DatabaseConnection) -> Result<usize> {
        let now = Utc::now();
        let models: Vec<CacheEntryActiveModel> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .entries
                .iter()
                .filter(|(_, e)| !e.is_expired(now))
                .map(|(fingerprint, e)| -> Result<CacheEntryActiveModel> {
                    Ok(CacheEntryActiveModel {
                        fingerprint: Set(fingerprint.clone()),
                        cache_type: Set(e.cache_type.as_str().to_string()),
                        params: Set(serde_json::to_value(&e.params)?),
                        data: Set(e.data.clone()),
                        created_at: Set(e.created_at.fixed_offset()),
                        expires_at: Set(e.expires_at.fixed_offset()),
                        access_count: Set(i64::try_from(e.access_count).unwrap_or(i64::MAX)),
                        last_accessed: Set(e.last_accessed.map(|t| t.fixed_offset())),
                    })
                })
                .collect::<Result<_>>()?
        };

        let written = models.len();
        let txn = db.begin().await?;
        CacheEntryTable::delete_many().exec(&txn).await?;

        let mut models = models.into_iter().peekable();
        while models.peek().is_some() {
            let chunk: Vec<_> = models.by_ref().take(FLUSH_CHUNK).collect();
            CacheEntryTable::insert_many(chunk).exec(&txn).await?;
        }
        txn.commit().await?;

        tracing::debug!(written, "Flushed request cache snapshot");
        Ok(written)
    }
}
