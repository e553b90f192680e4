//! InventoryRecord entity - one stock level for a product at a warehouse on a snapshot date.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::marketplace::Marketplace;

/// InventoryRecord model - a normalized inventory snapshot row.
///
/// The natural key is `(source, product_id, warehouse_id, stock_type, snapshot_date)`.
/// It is intentionally not enforced by a unique index: duplicates left behind by
/// crashed runs or other writers are detected and removed by the recovery pass.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_records")]
pub struct Model {
    /// Internal UUID primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Identity ────────────────────────────────────────────────────────────
    /// Marketplace the record was synchronized from.
    pub source: Marketplace,
    /// Marketplace product identifier.
    pub product_id: Option<String>,
    /// Seller article / SKU.
    pub sku: String,
    /// Warehouse identifier (or name, for marketplaces without numeric IDs).
    pub warehouse_id: Option<String>,
    /// Stock type (e.g. "fbo", "fbs", "in_way_to_client").
    pub stock_type: String,

    // ─── Quantities ──────────────────────────────────────────────────────────
    /// Units available.
    pub quantity: i64,
    /// Units reserved for pending orders.
    pub reserved: i64,

    // ─── Tracking ────────────────────────────────────────────────────────────
    /// Date the snapshot describes.
    pub snapshot_date: Date,
    /// Sync session (run log id) that last wrote this row.
    pub sync_session_id: Option<Uuid>,
    /// Sync session that inserted this row.
    pub created_session_id: Option<Uuid>,
    /// When this row was last written.
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Natural key used for upserts and duplicate detection.
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            product_id: self.product_id.clone(),
            warehouse_id: self.warehouse_id.clone(),
            stock_type: self.stock_type.clone(),
            snapshot_date: self.snapshot_date,
        }
    }
}

/// Per-source natural key of an inventory row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey {
    pub product_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub stock_type: String,
    pub snapshot_date: Date,
}
