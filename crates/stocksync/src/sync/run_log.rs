//! Persisted run history (`sync_logs`).

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, sea_query::Expr,
};
use uuid::Uuid;

use crate::entity::marketplace::Marketplace;
use crate::entity::sync_log::{ActiveModel, Column, Entity as SyncLog, Model, RunStatus};

use super::types::SyncResult;

/// Message stamped on runs left `running` by a previous process.
pub const WORKER_LOST: &str = "worker lost";

/// Insert a `running` row and return its session id.
pub async fn start_run<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
    task_type: &str,
) -> Result<Uuid, DbErr> {
    let id = Uuid::new_v4();
    ActiveModel {
        id: Set(id),
        source: Set(source),
        task_type: Set(task_type.to_string()),
        status: Set(RunStatus::Running),
        started_at: Set(Utc::now().fixed_offset()),
        completed_at: Set(None),
        duration_ms: Set(None),
        records_processed: Set(0),
        records_updated: Set(0),
        records_inserted: Set(0),
        records_failed: Set(0),
        api_requests: Set(0),
        error_message: Set(None),
        recovered_at: Set(None),
    }
    .insert(db)
    .await?;
    Ok(id)
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Close a run started with [`start_run`].
pub async fn finish_run<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    result: &SyncResult,
) -> Result<(), DbErr> {
    let Some(row) = SyncLog::find_by_id(session_id).one(db).await? else {
        return Err(DbErr::RecordNotFound(format!("sync log {session_id}")));
    };

    let mut active: ActiveModel = row.into();
    active.status = Set(result.status.into());
    active.completed_at = Set(Some(result.completed_at.fixed_offset()));
    active.duration_ms = Set(Some(result.duration_ms()));
    active.records_processed = Set(clamp_i64(result.records_processed));
    active.records_updated = Set(clamp_i64(result.records_updated));
    active.records_inserted = Set(clamp_i64(result.records_inserted));
    active.records_failed = Set(clamp_i64(result.records_failed));
    active.api_requests = Set(i32::try_from(result.api_requests_count).unwrap_or(i32::MAX));
    active.error_message = Set(result.error_message.clone());
    active.update(db).await?;
    Ok(())
}

/// Insert an already-completed run (used for fallback runs).
pub async fn record_run<C: ConnectionTrait>(
    db: &C,
    session_id: Uuid,
    task_type: &str,
    result: &SyncResult,
) -> Result<(), DbErr> {
    ActiveModel {
        id: Set(session_id),
        source: Set(result.source),
        task_type: Set(task_type.to_string()),
        status: Set(result.status.into()),
        started_at: Set(result.started_at.fixed_offset()),
        completed_at: Set(Some(result.completed_at.fixed_offset())),
        duration_ms: Set(Some(result.duration_ms())),
        records_processed: Set(clamp_i64(result.records_processed)),
        records_updated: Set(clamp_i64(result.records_updated)),
        records_inserted: Set(clamp_i64(result.records_inserted)),
        records_failed: Set(clamp_i64(result.records_failed)),
        api_requests: Set(i32::try_from(result.api_requests_count).unwrap_or(i32::MAX)),
        error_message: Set(result.error_message.clone()),
        recovered_at: Set(None),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Mark runs still `running` from a previous process as failed.
///
/// Must run before the scheduler starts, while no run of this process is live.
pub async fn sweep_orphaned<C: ConnectionTrait>(db: &C) -> Result<u64, DbErr> {
    let now = Utc::now().fixed_offset();
    let result = SyncLog::update_many()
        .col_expr(Column::Status, Expr::value(RunStatus::Failed))
        .col_expr(Column::CompletedAt, Expr::value(Some(now)))
        .col_expr(Column::ErrorMessage, Expr::value(Some(WORKER_LOST.to_string())))
        .filter(Column::Status.eq(RunStatus::Running))
        .exec(db)
        .await?;

    if result.rows_affected > 0 {
        tracing::warn!(count = result.rows_affected, "Marked orphaned runs as failed");
    }
    Ok(result.rows_affected)
}

/// Runs for a source started at or after `since`, newest first.
pub async fn runs_since<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
    since: DateTime<Utc>,
) -> Result<Vec<Model>, DbErr> {
    SyncLog::find()
        .filter(Column::Source.eq(source))
        .filter(Column::StartedAt.gte(since.fixed_offset()))
        .order_by_desc(Column::StartedAt)
        .all(db)
        .await
}

/// Most recent successful run for a source.
pub async fn last_success<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
) -> Result<Option<Model>, DbErr> {
    SyncLog::find()
        .filter(Column::Source.eq(source))
        .filter(Column::Status.eq(RunStatus::Success))
        .order_by_desc(Column::StartedAt)
        .one(db)
        .await
}

/// Whether any run was ever recorded for a source.
pub async fn has_runs<C: ConnectionTrait>(db: &C, source: Marketplace) -> Result<bool, DbErr> {
    Ok(SyncLog::find()
        .filter(Column::Source.eq(source))
        .one(db)
        .await?
        .is_some())
}

/// Most recent failed run whose rows have not been rolled back yet.
pub async fn latest_unrecovered_failure<C: ConnectionTrait>(
    db: &C,
    source: Marketplace,
) -> Result<Option<Model>, DbErr> {
    SyncLog::find()
        .filter(Column::Source.eq(source))
        .filter(Column::Status.eq(RunStatus::Failed))
        .filter(Column::RecoveredAt.is_null())
        .order_by_desc(Column::StartedAt)
        .one(db)
        .await
}

/// Stamp a run as recovered.
pub async fn mark_recovered<C: ConnectionTrait>(db: &C, session_id: Uuid) -> Result<(), DbErr> {
    SyncLog::update_many()
        .col_expr(
            Column::RecoveredAt,
            Expr::value(Some(Utc::now().fixed_offset())),
        )
        .filter(Column::Id.eq(session_id))
        .exec(db)
        .await?;
    Ok(())
}
