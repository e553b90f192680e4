//! Initial migration to create the stocksync database schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_inventory_records(manager).await?;
        self.create_sync_logs(manager).await?;
        self.create_cache_entries(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CacheEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(InventoryRecords::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_inventory_records(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(InventoryRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(InventoryRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Identity
                    .col(ColumnDef::new(InventoryRecords::Source).string().not_null())
                    .col(ColumnDef::new(InventoryRecords::ProductId).string().null())
                    .col(ColumnDef::new(InventoryRecords::Sku).string().not_null())
                    .col(ColumnDef::new(InventoryRecords::WarehouseId).string().null())
                    .col(
                        ColumnDef::new(InventoryRecords::StockType)
                            .string()
                            .not_null()
                            .default("default"),
                    )
                    // Quantities
                    .col(
                        ColumnDef::new(InventoryRecords::Quantity)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(InventoryRecords::Reserved)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    // Tracking
                    .col(
                        ColumnDef::new(InventoryRecords::SnapshotDate)
                            .date()
                            .not_null(),
                    )
                    .col(ColumnDef::new(InventoryRecords::SyncSessionId).uuid().null())
                    .col(ColumnDef::new(InventoryRecords::CreatedSessionId).uuid().null())
                    .col(
                        ColumnDef::new(InventoryRecords::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookup by natural key; deliberately not unique (see entity docs).
        manager
            .create_index(
                Index::create()
                    .name("idx_inventory_natural_key")
                    .table(InventoryRecords::Table)
                    .col(InventoryRecords::Source)
                    .col(InventoryRecords::SnapshotDate)
                    .col(InventoryRecords::ProductId)
                    .col(InventoryRecords::WarehouseId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_inventory_session")
                    .table(InventoryRecords::Table)
                    .col(InventoryRecords::SyncSessionId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_logs(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncLogs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncLogs::Source).string().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::TaskType)
                            .string()
                            .not_null()
                            .default("stocks"),
                    )
                    .col(ColumnDef::new(SyncLogs::Status).string().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncLogs::DurationMs).big_integer().null())
                    .col(
                        ColumnDef::new(SyncLogs::RecordsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::RecordsUpdated)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::RecordsInserted)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::RecordsFailed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::ApiRequests)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncLogs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncLogs::RecoveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_source_started")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::Source)
                    .col(SyncLogs::StartedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_cache_entries(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CacheEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CacheEntries::Fingerprint)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CacheEntries::CacheType).string().not_null())
                    .col(ColumnDef::new(CacheEntries::Params).json().not_null())
                    .col(ColumnDef::new(CacheEntries::Data).json().not_null())
                    .col(
                        ColumnDef::new(CacheEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CacheEntries::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CacheEntries::AccessCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CacheEntries::LastAccessed)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum InventoryRecords {
    Table,
    Id,
    Source,
    ProductId,
    Sku,
    WarehouseId,
    StockType,
    Quantity,
    Reserved,
    SnapshotDate,
    SyncSessionId,
    CreatedSessionId,
    SyncedAt,
}

#[derive(DeriveIden)]
enum SyncLogs {
    Table,
    Id,
    Source,
    TaskType,
    Status,
    StartedAt,
    CompletedAt,
    DurationMs,
    RecordsProcessed,
    RecordsUpdated,
    RecordsInserted,
    RecordsFailed,
    ApiRequests,
    ErrorMessage,
    RecoveredAt,
}

#[derive(DeriveIden)]
enum CacheEntries {
    Table,
    Fingerprint,
    CacheType,
    Params,
    Data,
    CreatedAt,
    ExpiresAt,
    AccessCount,
    LastAccessed,
}
