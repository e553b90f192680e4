//! SeaORM entity definitions for the stocksync database schema.

pub mod cache_entry;
pub mod inventory_record;
pub mod marketplace;
pub mod prelude;
pub mod sync_log;
