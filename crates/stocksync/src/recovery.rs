//! Corrupted-data cleanup, failed-run rollback and integrity scoring.
//!
//! Every operation returns a typed report with an [`OperationStatus`] and a
//! timestamp. Database failures roll the transaction back and come back as
//! `status = error`; they are never surfaced as `Err`.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::inventory_record::{Column, Entity as InventoryRecord, Model};
use crate::entity::marketplace::Marketplace;
use crate::entity::sync_log::{Entity as SyncLog, RunStatus};
use crate::inventory::{self, InventoryError};
use crate::status::OperationStatus;
use crate::window;
use crate::sync::{TaskId, run_log};

const DELETE_CHUNK: usize = 500;

/// Recovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Snapshots older than this many days are stale.
    pub stale_after_days: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 90,
        }
    }
}

/// Kinds of bad rows the recovery pass looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    NegativeValues,
    NullKeys,
    EmptyIdentifiers,
    FutureDates,
    StaleSnapshots,
    Duplicates,
}

/// Per-category row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub negative_values: u64,
    pub null_keys: u64,
    pub empty_identifiers: u64,
    pub future_dates: u64,
    pub stale_snapshots: u64,
    pub duplicates: u64,
}

impl IssueCounts {
    fn bump(&mut self, category: IssueCategory, n: u64) {
        let slot = match category {
            IssueCategory::NegativeValues => &mut self.negative_values,
            IssueCategory::NullKeys => &mut self.null_keys,
            IssueCategory::EmptyIdentifiers => &mut self.empty_identifiers,
            IssueCategory::FutureDates => &mut self.future_dates,
            IssueCategory::StaleSnapshots => &mut self.stale_snapshots,
            IssueCategory::Duplicates => &mut self.duplicates,
        };
        *slot += n;
    }

    pub fn total(&self) -> u64 {
        self.negative_values
            + self.null_keys
            + self.empty_identifiers
            + self.future_dates
            + self.stale_snapshots
            + self.duplicates
    }

    /// Issues that count against the integrity score.
    pub fn integrity_issues(&self) -> u64 {
        self.negative_values + self.null_keys + self.empty_identifiers + self.duplicates
    }
}

/// Report for [`RecoveryManager::force_resync`].
#[derive(Debug, Clone, Serialize)]
pub struct ResyncReport {
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub source: Marketplace,
    pub days_back: i64,
    pub records_deleted: u64,
    /// Sync queued to rewrite the window, when one was requested.
    pub task_id: Option<TaskId>,
    pub message: Option<String>,
}

/// Report for [`RecoveryManager::cleanup_corrupted_data`].
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub source: Marketplace,
    pub days_back: i64,
    pub removed: IssueCounts,
    pub total_removed: u64,
    pub message: Option<String>,
}

/// Report for [`RecoveryManager::recover_from_failure`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecoveryReport {
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub source: Marketplace,
    pub session_id: Option<Uuid>,
    pub failed_run_started_at: Option<DateTime<Utc>>,
    pub records_removed: u64,
    pub message: Option<String>,
}

/// Report for [`RecoveryManager::validate_data_integrity`].
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub status: OperationStatus,
    pub timestamp: DateTime<Utc>,
    pub source: Marketplace,
    pub total_records: u64,
    /// `(total - issues) / total * 100`, clamped to `[0, 100]`.
    pub integrity_score: f64,
    pub issues: IssueCounts,
    pub message: Option<String>,
}

/// First category a row falls into, ignoring duplicates.
fn classify_row(row: &Model, today: NaiveDate, stale_before: NaiveDate) -> Option<IssueCategory> {
    if row.quantity < 0 || row.reserved < 0 {
        Some(IssueCategory::NegativeValues)
    } else if row.product_id.is_none() || row.warehouse_id.is_none() {
        Some(IssueCategory::NullKeys)
    } else if is_blank(Some(&row.sku))
        || is_blank(row.product_id.as_ref())
        || is_blank(row.warehouse_id.as_ref())
    {
        Some(IssueCategory::EmptyIdentifiers)
    } else if row.snapshot_date > today {
        Some(IssueCategory::FutureDates)
    } else if row.snapshot_date < stale_before {
        Some(IssueCategory::StaleSnapshots)
    } else {
        None
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.is_some_and(|v| v.trim().is_empty())
}

/// Ids of every row except the most recently synced one per natural key.
fn duplicate_ids<'a>(rows: impl IntoIterator<Item = &'a Model>) -> Vec<Uuid> {
    let mut groups: HashMap<_, Vec<&Model>> = HashMap::new();
    for row in rows {
        groups.entry(row.natural_key()).or_default().push(row);
    }

    let mut extra = Vec::new();
    for mut group in groups.into_values() {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| b.synced_at.cmp(&a.synced_at).then(b.id.cmp(&a.id)));
        extra.extend(group.into_iter().skip(1).map(|r| r.id));
    }
    extra
}

async fn delete_ids<C: ConnectionTrait>(db: &C, ids: &[Uuid]) -> Result<u64, DbErr> {
    let mut deleted = 0;
    for chunk in ids.chunks(DELETE_CHUNK) {
        deleted += InventoryRecord::delete_many()
            .filter(Column::Id.is_in(chunk.iter().copied()))
            .exec(db)
            .await?
            .rows_affected;
    }
    Ok(deleted)
}

fn inventory_db_err(e: InventoryError) -> DbErr {
    match e {
        InventoryError::Database(db) => db,
        other => DbErr::Custom(other.to_string()),
    }
}

/// Detects and removes bad persisted state.
#[derive(Clone)]
pub struct RecoveryManager {
    db: DatabaseConnection,
    config: RecoveryConfig,
}

impl RecoveryManager {
    pub fn new(db: DatabaseConnection, config: RecoveryConfig) -> Self {
        Self { db, config }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Delete a source's rows from the last `days_back` days so the next
    /// sync rewrites them from scratch.
    pub async fn force_resync(&self, source: Marketplace, days_back: i64) -> ResyncReport {
        let from = window::days_before(Self::today(), days_back);
        let result: Result<u64, DbErr> = async {
            let txn = self.db.begin().await?;
            let deleted = inventory::delete_since(&txn, source, from)
                .await
                .map_err(inventory_db_err)?;
            txn.commit().await?;
            Ok(deleted)
        }
        .await;

        let (status, records_deleted, message) = match result {
            Ok(0) => (OperationStatus::NoAction, 0, Some("no records in window".to_string())),
            Ok(n) => (OperationStatus::Success, n, None),
            Err(e) => {
                tracing::error!(source = %source, error = %e, "Force resync cleanup failed");
                (OperationStatus::Error, 0, Some(e.to_string()))
            }
        };
        tracing::info!(source = %source, days_back, records_deleted, %status, "Force resync");

        ResyncReport {
            status,
            timestamp: Utc::now(),
            source,
            days_back,
            records_deleted,
            task_id: None,
            message,
        }
    }

    /// Remove corrupted rows inside one transaction.
    ///
    /// Negative, null-key, blank-identifier, future-dated and duplicate rows
    /// are looked for among snapshots from the last `days_back` days (and any
    /// future-dated ones); stale snapshots are looked for across the whole
    /// source. Duplicates keep the most recently synced row.
    pub async fn cleanup_corrupted_data(&self, source: Marketplace, days_back: i64) -> CleanupReport {
        let today = Self::today();
        let from = window::days_before(today, days_back);
        let stale_before = window::days_before(today, self.config.stale_after_days);

        let result: Result<IssueCounts, DbErr> = async {
            let txn = self.db.begin().await?;

            let mut candidates = InventoryRecord::find()
                .filter(Column::Source.eq(source))
                .filter(Column::SnapshotDate.gte(from))
                .all(&txn)
                .await?;
            candidates.extend(
                InventoryRecord::find()
                    .filter(Column::Source.eq(source))
                    .filter(Column::SnapshotDate.lt(from.min(stale_before)))
                    .all(&txn)
                    .await?,
            );

            let mut removed = IssueCounts::default();
            let mut doomed = Vec::new();
            let mut survivors = Vec::new();
            for row in &candidates {
                match classify_row(row, today, stale_before) {
                    Some(category) => {
                        removed.bump(category, 1);
                        doomed.push(row.id);
                    }
                    None => survivors.push(row),
                }
            }

            let dups = duplicate_ids(survivors);
            removed.bump(IssueCategory::Duplicates, dups.len() as u64);
            doomed.extend(dups);

            delete_ids(&txn, &doomed).await?;
            txn.commit().await?;
            Ok(removed)
        }
        .await;

        let (status, removed, message) = match result {
            Ok(removed) if removed.total() == 0 => (OperationStatus::NoAction, removed, None),
            Ok(removed) => (OperationStatus::Success, removed, None),
            Err(e) => {
                tracing::error!(source = %source, error = %e, "Cleanup rolled back");
                (OperationStatus::Error, IssueCounts::default(), Some(e.to_string()))
            }
        };
        tracing::info!(source = %source, removed = removed.total(), %status, "Corrupted data cleanup");

        CleanupReport {
            status,
            timestamp: Utc::now(),
            source,
            days_back,
            removed,
            total_removed: removed.total(),
            message,
        }
    }

    /// Roll back the rows written by a failed run.
    ///
    /// With `session_id = None`, the most recent failed run that has not been
    /// recovered yet is used.
    pub async fn recover_from_failure(
        &self,
        source: Marketplace,
        session_id: Option<Uuid>,
    ) -> FailureRecoveryReport {
        let report = |status, session_id, started, removed, message: Option<String>| {
            FailureRecoveryReport {
                status,
                timestamp: Utc::now(),
                source,
                session_id,
                failed_run_started_at: started,
                records_removed: removed,
                message,
            }
        };

        let run = match session_id {
            Some(id) => SyncLog::find_by_id(id).one(&self.db).await.map(|run| {
                run.filter(|r| {
                    r.source == source && r.status == RunStatus::Failed && r.recovered_at.is_none()
                })
            }),
            None => run_log::latest_unrecovered_failure(&self.db, source).await,
        };

        let run = match run {
            Ok(Some(run)) => run,
            Ok(None) => {
                return report(
                    OperationStatus::NoAction,
                    session_id,
                    None,
                    0,
                    Some("no unrecovered failed run".to_string()),
                );
            }
            Err(e) => {
                return report(OperationStatus::Error, session_id, None, 0, Some(e.to_string()));
            }
        };

        let started = run.started_at.with_timezone(&Utc);
        let result: Result<u64, DbErr> = async {
            let txn = self.db.begin().await?;
            let removed = inventory::delete_by_session(&txn, run.id)
                .await
                .map_err(inventory_db_err)?;
            run_log::mark_recovered(&txn, run.id).await?;
            txn.commit().await?;
            Ok(removed)
        }
        .await;

        match result {
            Ok(removed) => {
                tracing::info!(source = %source, session = %run.id, removed, "Recovered from failed run");
                report(OperationStatus::Success, Some(run.id), Some(started), removed, run.error_message)
            }
            Err(e) => {
                tracing::error!(source = %source, session = %run.id, error = %e, "Failure recovery rolled back");
                report(OperationStatus::Error, Some(run.id), Some(started), 0, Some(e.to_string()))
            }
        }
    }

    /// Score the stored rows of a source.
    ///
    /// Issues are negative values, null keys, blank identifiers and extra
    /// rows per duplicated natural key; a row can count in more than one
    /// category. An empty table scores 100.
    pub async fn validate_data_integrity(&self, source: Marketplace) -> IntegrityReport {
        let rows = match InventoryRecord::find()
            .filter(Column::Source.eq(source))
            .all(&self.db)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                return IntegrityReport {
                    status: OperationStatus::Error,
                    timestamp: Utc::now(),
                    source,
                    total_records: 0,
                    integrity_score: 0.0,
                    issues: IssueCounts::default(),
                    message: Some(e.to_string()),
                };
            }
        };

        let today = Self::today();
        let stale_before = window::days_before(today, self.config.stale_after_days);
        let issues = count_issues(&rows, today, stale_before);
        let total = rows.len() as u64;
        let score = integrity_score(total, issues.integrity_issues());

        tracing::info!(source = %source, total, score, "Validated data integrity");

        IntegrityReport {
            status: OperationStatus::Success,
            timestamp: Utc::now(),
            source,
            total_records: total,
            integrity_score: score,
            issues,
            message: None,
        }
    }
}

fn count_issues(rows: &[Model], today: NaiveDate, stale_before: NaiveDate) -> IssueCounts {
    let mut issues = IssueCounts::default();
    for row in rows {
        if row.quantity < 0 || row.reserved < 0 {
            issues.bump(IssueCategory::NegativeValues, 1);
        }
        if row.product_id.is_none() || row.warehouse_id.is_none() {
            issues.bump(IssueCategory::NullKeys, 1);
        }
        if is_blank(Some(&row.sku))
            || is_blank(row.product_id.as_ref())
            || is_blank(row.warehouse_id.as_ref())
        {
            issues.bump(IssueCategory::EmptyIdentifiers, 1);
        }
        if row.snapshot_date > today {
            issues.bump(IssueCategory::FutureDates, 1);
        }
        if row.snapshot_date < stale_before {
            issues.bump(IssueCategory::StaleSnapshots, 1);
        }
    }
    issues.bump(IssueCategory::Duplicates, duplicate_ids(rows).len() as u64);
    issues
}

fn integrity_score(total: u64, issues: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let score = (total as f64 - issues as f64) / total as f64 * 100.0;
    score.clamp(0.0, 100.0)
}
