//! SyncLog entity - one row per synchronization run (the run log).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::marketplace::Marketplace;

/// Terminal (or in-flight) status of a synchronization run.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "partial")]
    Partial,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "fallback")]
    Fallback,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

/// SyncLog model - persisted history of synchronization runs.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_logs")]
pub struct Model {
    /// Session ID; inventory rows written by the run reference it.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub source: Marketplace,
    /// Kind of synchronization (e.g. "stocks").
    pub task_type: String,
    pub status: RunStatus,

    pub started_at: DateTimeWithTimeZone,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub duration_ms: Option<i64>,

    pub records_processed: i64,
    pub records_updated: i64,
    pub records_inserted: i64,
    pub records_failed: i64,
    pub api_requests: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    /// Set once the rows written by a failed run have been rolled back.
    pub recovered_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
