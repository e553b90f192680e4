use chrono::NaiveDate;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, QueryTrait,
};
use uuid::Uuid;

use crate::entity::inventory_record::{Column, Entity as InventoryRecord, Model};
use crate::entity::marketplace::Marketplace;
use crate::entity::sync_log::{Column as SyncLogColumn, Entity as SyncLog, RunStatus};

use super::errors::Result;

// ─── Query Operations ────────────────────────────────────────────────────────

/// All rows for one source on one snapshot date.
pub async fn find_by_date<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
    date: NaiveDate,
) -> Result<Vec<Model>> {
    Ok(InventoryRecord::find()
        .filter(Column::Source.eq(source))
        .filter(Column::SnapshotDate.eq(date))
        .order_by_asc(Column::Sku)
        .all(db)
        .await?)
}

/// All rows for one source with a snapshot date on or after `from`.
pub async fn find_since<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
    from: NaiveDate,
) -> Result<Vec<Model>> {
    Ok(InventoryRecord::find()
        .filter(Column::Source.eq(source))
        .filter(Column::SnapshotDate.gte(from))
        .order_by_asc(Column::SnapshotDate)
        .all(db)
        .await?)
}

/// Number of rows stored for a source.
pub async fn count_by_source<C: ConnectionTrait>(db: &C, source: Marketplace) -> Result<u64> {
    Ok(InventoryRecord::find()
        .filter(Column::Source.eq(source))
        .count(db)
        .await?)
}

// ─── Delete Operations ───────────────────────────────────────────────────────

/// Delete rows last written by a failed sync session.
///
/// Only rows inserted by that session or by another failed run go; rows that
/// an earlier good run inserted and the session merely updated stay.
pub async fn delete_by_session<C: ConnectionTrait>(db: &C, session_id: Uuid) -> Result<u64> {
    let failed_runs = SyncLog::find()
        .select_only()
        .column(SyncLogColumn::Id)
        .filter(SyncLogColumn::Status.eq(RunStatus::Failed))
        .into_query();
    let result = InventoryRecord::delete_many()
        .filter(Column::SyncSessionId.eq(session_id))
        .filter(
            Condition::any()
                .add(Column::CreatedSessionId.eq(session_id))
                .add(Column::CreatedSessionId.in_subquery(failed_runs)),
        )
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

/// Delete a source's rows with a snapshot date on or after `from`.
pub async fn delete_since<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
    from: NaiveDate,
) -> Result<u64> {
    let result = InventoryRecord::delete_many()
        .filter(Column::Source.eq(source))
        .filter(Column::SnapshotDate.gte(from))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}
