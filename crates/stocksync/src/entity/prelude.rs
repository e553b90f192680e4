//! Common re-exports for convenient entity usage.

pub use super::cache_entry::{
    ActiveModel as CacheEntryActiveModel, Column as CacheEntryColumn, Entity as CacheEntryTable,
    Model as CacheEntryModel,
};
pub use super::inventory_record::{
    ActiveModel as InventoryRecordActiveModel, Column as InventoryRecordColumn,
    Entity as InventoryRecord, Model as InventoryRecordModel,
};
pub use super::marketplace::Marketplace;
pub use super::sync_log::{
    ActiveModel as SyncLogActiveModel, Column as SyncLogColumn, Entity as SyncLog,
    Model as SyncLogModel, RunStatus,
};
