//! Error types for the sync layer.
//!
//! The taxonomy drives the drain loop's control flow: transient failures
//! back off and retry, permanent rejections flag the record and move on,
//! an expired session halts the whole drain. Conflicts are not errors —
//! they come back as a [`PushOutcome`](crate::remote::PushOutcome) and are
//! resolved, never surfaced. Local storage faults are
//! [`StoreError`](wordtrail_store::StoreError)s and quarantine the record
//! they hit.

use thiserror::Error;
use wordtrail_store::StoreError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A classified failure from the remote store.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Timeout, 5xx, connectivity drop mid-call. Retried with backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Validation failure or another non-auth 4xx. Not retried
    /// automatically; must not block other records.
    #[error("permanent rejection: {0}")]
    Permanent(String),

    /// The session is no longer valid. Halts the drain.
    #[error("authentication expired")]
    AuthExpired,
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Classified remote failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local storage fault.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
