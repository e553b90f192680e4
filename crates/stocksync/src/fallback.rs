//! Substitute data when a live sync cannot complete.
//!
//! Two strategies, tried in order by the sync executor:
//! reuse the most recent fresh snapshot, or estimate stock levels from
//! recent history. Both results are reported with status `fallback` and are
//! never counted as live successes.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::inventory_record::{ActiveModel, Column, Entity as InventoryRecord, Model};
use crate::entity::marketplace::Marketplace;
use crate::inventory::{self, InventoryError};
use crate::status::OperationStatus;
use crate::window;
use crate::sync::run_log;
use crate::sync::{SyncResult, SyncStatus};

const INSERT_CHUNK: usize = 50;

/// Fallback configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Fewer data points than this and no estimate is produced.
    pub min_history_points: usize,
    /// Task type written on fallback run-log entries.
    pub task_type: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            min_history_points: 10,
            task_type: "stocks".to_string(),
        }
    }
}

/// Report for [`FallbackManager::use_cached_data`].
#[derive(Debug, Clone, Serialize)]
pub struct CachedDataReport {
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub source: Marketplace,
    /// Snapshot date the rows were copied from.
    pub copied_from: Option<NaiveDate>,
    pub records_copied: u64,
    /// Fallback session the copies were written under.
    pub session_id: Option<Uuid>,
    pub message: Option<String>,
}

/// Estimated stock level for one natural key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryEstimate {
    pub product_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub stock_type: String,
    pub sku: String,
    /// Mean rounded to whole units.
    pub estimated_quantity: i64,
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

/// Report for [`FallbackManager::estimate_inventory_from_history`].
#[derive(Debug, Clone, Serialize)]
pub struct EstimateReport {
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub source: Marketplace,
    pub days_back: i64,
    pub data_points: usize,
    pub estimates: Vec<InventoryEstimate>,
    pub message: Option<String>,
}

impl EstimateReport {
    /// Total estimated units across all keys.
    pub fn total_quantity(&self) -> i64 {
        self.estimates.iter().map(|e| e.estimated_quantity).sum()
    }
}

/// Builds substitute inventory data from persisted history.
#[derive(Clone)]
pub struct FallbackManager {
    db: DatabaseConnection,
    config: FallbackConfig,
}

impl FallbackManager {
    pub fn new(db: DatabaseConnection, config: FallbackConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Copy the most recent snapshot synced within `max_age_hours` as
    /// today's snapshot, under a new session logged as a `fallback` run.
    pub async fn use_cached_data(&self, source: Marketplace, max_age_hours: i64) -> CachedDataReport {
        let started_at = Utc::now();
        let today = started_at.date_naive();
        let cutoff = window::hours_before(started_at, max_age_hours);

        let report = |status, copied_from, records_copied, session_id, message: Option<String>| {
            CachedDataReport {
                status,
                timestamp: Utc::now(),
                source,
                copied_from,
                records_copied,
                session_id,
                message,
            }
        };

        let latest: Result<Option<NaiveDate>, DbErr> = InventoryRecord::find()
            .select_only()
            .column(Column::SnapshotDate)
            .filter(Column::Source.eq(source))
            .filter(Column::SyncedAt.gte(cutoff.fixed_offset()))
            .filter(Column::SnapshotDate.lte(today))
            .order_by_desc(Column::SnapshotDate)
            .limit(1)
            .into_tuple()
            .one(&self.db)
            .await;

        let snapshot_date = match latest {
            Ok(Some(date)) => date,
            Ok(None) => {
                tracing::warn!(source = %source, max_age_hours, "No fresh snapshot to fall back on");
                return report(
                    OperationStatus::NoCache,
                    None,
                    0,
                    None,
                    Some(format!("no snapshot synced in the last {max_age_hours}h")),
                );
            }
            Err(e) => return report(OperationStatus::Error, None, 0, None, Some(e.to_string())),
        };

        if snapshot_date == today {
            return report(
                OperationStatus::NoAction,
                Some(today),
                0,
                None,
                Some("today's snapshot is already stored".to_string()),
            );
        }

        let session_id = Uuid::new_v4();
        match self
            .copy_snapshot(source, snapshot_date, today, session_id, started_at)
            .await
        {
            Ok(copied) => {
                tracing::info!(
                    source = %source,
                    from = %snapshot_date,
                    records = copied,
                    session = %session_id,
                    "Fell back to cached snapshot"
                );
                report(
                    OperationStatus::Success,
                    Some(snapshot_date),
                    copied,
                    Some(session_id),
                    None,
                )
            }
            Err(e) => {
                tracing::error!(source = %source, error = %e, "Cached fallback rolled back");
                report(OperationStatus::Error, Some(snapshot_date), 0, None, Some(e.to_string()))
            }
        }
    }

    async fn copy_snapshot(
        &self,
        source: Marketplace,
        from: NaiveDate,
        to: NaiveDate,
        session_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let txn = self.db.begin().await?;

        let rows = inventory::find_by_date(&txn, source, from)
            .await
            .map_err(|e| match e {
                InventoryError::Database(db) => db,
                other => DbErr::Custom(other.to_string()),
            })?;
        let now = Utc::now().fixed_offset();
        let copies: Vec<ActiveModel> = rows
            .iter()
            .filter(|row| is_copyable(row))
            .map(|row| ActiveModel {
                id: Set(Uuid::new_v4()),
                source: Set(source),
                product_id: Set(row.product_id.clone()),
                sku: Set(row.sku.clone()),
                warehouse_id: Set(row.warehouse_id.clone()),
                stock_type: Set(row.stock_type.clone()),
                quantity: Set(row.quantity),
                reserved: Set(row.reserved),
                snapshot_date: Set(to),
                sync_session_id: Set(Some(session_id)),
                created_session_id: Set(Some(session_id)),
                synced_at: Set(now),
            })
            .collect();
        let copied = copies.len() as u64;

        let mut pending = copies.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<ActiveModel> = pending.by_ref().take(INSERT_CHUNK).collect();
            InventoryRecord::insert_many(chunk).exec(&txn).await?;
        }

        let result = SyncResult {
            source,
            status: SyncStatus::Fallback,
            records_processed: copied,
            records_updated: 0,
            records_inserted: copied,
            records_failed: 0,
            started_at,
            completed_at: Utc::now(),
            error_message: Some(format!("copied snapshot of {from}")),
            api_requests_count: 0,
            session_id: Some(session_id),
            error: None,
        };
        run_log::record_run(&txn, session_id, &self.config.task_type, &result).await?;

        txn.commit().await?;
        Ok(copied)
    }

    /// Estimate current stock per natural key from the last `days_back` days.
    ///
    /// Estimates are returned, not persisted.
    pub async fn estimate_inventory_from_history(
        &self,
        source: Marketplace,
        days_back: i64,
    ) -> EstimateReport {
        let from = window::days_before(Utc::now().date_naive(), days_back);
        let report = |status, data_points, estimates, message: Option<String>| EstimateReport {
            status,
            timestamp: Utc::now(),
            source,
            days_back,
            data_points,
            estimates,
            message,
        };

        let rows = match inventory::find_since(&self.db, source, from).await {
            Ok(rows) => rows,
            Err(e) => return report(OperationStatus::Error, 0, Vec::new(), Some(e.to_string())),
        };
        let rows: Vec<Model> = rows.into_iter().filter(is_copyable).collect();

        if rows.len() < self.config.min_history_points {
            return report(
                OperationStatus::NoData,
                rows.len(),
                Vec::new(),
                Some(format!(
                    "{} data points, need {}",
                    rows.len(),
                    self.config.min_history_points
                )),
            );
        }

        let estimates = estimate(&rows);
        tracing::info!(
            source = %source,
            data_points = rows.len(),
            keys = estimates.len(),
            "Estimated inventory from history"
        );
        report(OperationStatus::Success, rows.len(), estimates, None)
    }
}

fn is_copyable(row: &Model) -> bool {
    row.quantity >= 0 && row.reserved >= 0 && row.product_id.is_some() && row.warehouse_id.is_some()
}

type EstimateKey = (Option<String>, Option<String>, String);

fn estimate(rows: &[Model]) -> Vec<InventoryEstimate> {
    let mut groups: BTreeMap<EstimateKey, Vec<&Model>> = BTreeMap::new();
    for row in rows {
        let key = (
            row.product_id.clone(),
            row.warehouse_id.clone(),
            row.stock_type.clone(),
        );
        groups.entry(key).or_default().push(row);
    }

    groups
        .into_iter()
        .map(|((product_id, warehouse_id, stock_type), samples)| {
            let n = samples.len() as f64;
            let mean = samples.iter().map(|r| r.quantity as f64).sum::<f64>() / n;
            let variance = samples
                .iter()
                .map(|r| (r.quantity as f64 - mean).powi(2))
                .sum::<f64>()
                / n;
            let sku = samples
                .iter()
                .max_by_key(|r| r.snapshot_date)
                .map(|r| r.sku.clone())
                .unwrap_or_default();
            InventoryEstimate {
                product_id,
                warehouse_id,
                stock_type,
                sku,
                estimated_quantity: mean.round() as i64,
                mean,
                std_dev: variance.sqrt(),
                samples: samples.len(),
            }
        })
        .collect()
}
