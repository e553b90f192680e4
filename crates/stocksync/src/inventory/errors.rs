use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur while persisting inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// The sink rejected a whole batch.
    #[error("Invalid batch: {message}")]
    InvalidBatch { message: String },
}

impl InventoryError {
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch {
            message: message.into(),
        }
    }

    /// Whether retrying the same batch could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(e) => crate::retry::is_retryable_db_error(e),
            Self::InvalidBatch { .. } => false,
        }
    }
}

/// Result type alias for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
