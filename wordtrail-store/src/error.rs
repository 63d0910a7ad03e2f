//! Error types for the storage layer.

use thiserror::Error;
use wordtrail_types::EntityId;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// A failure is fatal only to the operation that raised it; other records
/// are unaffected.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(EntityId),

    /// Write against a soft-deleted record.
    #[error("record was deleted: {0}")]
    Deleted(EntityId),

    /// A stored row could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),
}
