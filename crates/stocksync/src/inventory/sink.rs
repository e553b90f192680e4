use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Serialize;
use uuid::Uuid;

use crate::entity::inventory_record::{ActiveModel, Column, Entity as InventoryRecord};
use crate::entity::marketplace::Marketplace;
use crate::platform::StockRecord;
use crate::retry::{RetryConfig, with_retry};

use super::errors::{InventoryError, Result};

/// Per-batch persistence counts.
///
/// `updated + inserted + failed` always equals the batch length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub updated: u64,
    pub inserted: u64,
    pub failed: u64,
}

impl PersistOutcome {
    pub fn total(&self) -> u64 {
        self.updated + self.inserted + self.failed
    }
}

impl std::ops::AddAssign for PersistOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.updated += rhs.updated;
        self.inserted += rhs.inserted;
        self.failed += rhs.failed;
    }
}

/// Persistence collaborator for normalized records.
///
/// Implementations upsert by natural key, so replaying a batch is idempotent.
#[async_trait]
pub trait InventorySink: Send + Sync {
    async fn persist_batch(
        &self,
        records: &[StockRecord],
        source: Marketplace,
        session_id: Uuid,
    ) -> Result<PersistOutcome>;
}

/// Why a record would be rejected, or `None` if it is storable.
///
/// Rejected records are exactly the ones the integrity check would flag:
/// negative quantities, missing or empty keys.
pub fn validate_record(record: &StockRecord) -> Option<&'static str> {
    if record.quantity < 0 || record.reserved < 0 {
        return Some("negative quantity");
    }
    if record.sku.trim().is_empty() {
        return Some("empty sku");
    }
    match (&record.product_id, &record.warehouse_id) {
        (None, _) | (_, None) => Some("missing product or warehouse"),
        (Some(p), Some(w)) if p.trim().is_empty() || w.trim().is_empty() => {
            Some("empty product or warehouse")
        }
        _ => None,
    }
}

/// SQL-backed sink that upserts through SeaORM, one transaction per batch.
#[derive(Clone)]
pub struct DbInventorySink {
    db: DatabaseConnection,
    retry: RetryConfig,
}

impl DbInventorySink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn persist_once(
        &self,
        records: &[StockRecord],
        source: Marketplace,
        session_id: Uuid,
    ) -> Result<PersistOutcome> {
        let now = Utc::now().fixed_offset();
        let mut outcome = PersistOutcome::default();
        let txn = self.db.begin().await?;

        for record in records {
            if let Some(reason) = validate_record(record) {
                tracing::debug!(source = %source, sku = %record.sku, reason, "Rejected record");
                outcome.failed += 1;
                continue;
            }

            let existing = InventoryRecord::find()
                .filter(Column::Source.eq(source))
                .filter(Column::ProductId.eq(record.product_id.clone()))
                .filter(Column::WarehouseId.eq(record.warehouse_id.clone()))
                .filter(Column::StockType.eq(record.stock_type.clone()))
                .filter(Column::SnapshotDate.eq(record.snapshot_date))
                .one(&txn)
                .await?;

            match existing {
                Some(row) => {
                    let mut active: ActiveModel = row.into();
                    active.sku = Set(record.sku.clone());
                    active.quantity = Set(record.quantity);
                    active.reserved = Set(record.reserved);
                    active.sync_session_id = Set(Some(session_id));
                    active.synced_at = Set(now);
                    active.update(&txn).await?;
                    outcome.updated += 1;
                }
                None => {
                    record
                        .to_active_model(source, session_id, now)
                        .insert(&txn)
                        .await?;
                    outcome.inserted += 1;
                }
            }
        }

        txn.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl InventorySink for DbInventorySink {
    async fn persist_batch(
        &self,
        records: &[StockRecord],
        source: Marketplace,
        session_id: Uuid,
    ) -> Result<PersistOutcome> {
        if records.is_empty() {
            return Ok(PersistOutcome::default());
        }

        let outcome = with_retry(
            || self.persist_once(records, source, session_id),
            &self.retry,
            InventoryError::is_transient,
            "persist inventory batch",
        )
        .await?;

        tracing::debug!(
            source = %source,
            session = %session_id,
            inserted = outcome.inserted,
            updated = outcome.updated,
            failed = outcome.failed,
            "Persisted inventory batch"
        );
        Ok(outcome)
    }
}
