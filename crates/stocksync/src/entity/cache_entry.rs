//! CacheEntry entity - persisted snapshot of the in-memory request cache.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persisted request-cache entry, keyed by its fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cache_entries")]
pub struct Model {
    /// SHA-256 fingerprint of the cache key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub fingerprint: String,
    /// Cache type name (e.g. "product_info").
    pub cache_type: String,
    /// Sorted key parameters.
    #[sea_orm(column_type = "Json")]
    pub params: Json,
    /// Cached payload.
    #[sea_orm(column_type = "Json")]
    pub data: Json,
    pub created_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
    pub access_count: i64,
    pub last_accessed: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
