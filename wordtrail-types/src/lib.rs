//! Core type definitions for WordTrail.
//!
//! This crate defines the fundamental, UI-agnostic types shared by the
//! storage and sync layers:
//! - Entity and owner identifiers (UUID v7)
//! - Hybrid Logical Clock timestamps (the basis for last-write-wins)
//! - Entity kinds and pending sync operations
//!
//! Domain types (books, vocabulary words, profile, settings) live in
//! `wordtrail-model`, not here.

mod entity;
mod ids;
mod timestamp;

pub use entity::{EntityKind, PendingOp};
pub use ids::{EntityId, OwnerId};
pub use timestamp::HybridTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("unknown pending operation: {0}")]
    UnknownOp(String),
}
