//! Inventory persistence: the batch sink used by the sync engine plus the
//! queries that recovery, fallback and health share.

mod errors;
mod query;
mod sink;

pub use errors::{InventoryError, Result};
pub use query::{count_by_source, delete_by_session, delete_since, find_by_date, find_since};
pub use sink::{DbInventorySink, InventorySink, PersistOutcome, validate_record};
