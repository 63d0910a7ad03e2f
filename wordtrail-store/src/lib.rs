//! SQLite storage layer for WordTrail.
//!
//! The single source of truth for on-device state. All UI reads and all
//! ViewModel writes go through [`LocalStore`]; the sync engine drains the
//! [`ChangeQueue`] derived from its dirty/tombstone markers.
//!
//! # Architecture
//!
//! - Records are stored as JSON payloads inside a sync envelope
//!   (dirty flag, pending operation, tombstone, failure markers)
//! - The change queue is a live view over those markers — there is no
//!   separate operation log to keep consistent
//! - Writes are serialized behind one connection mutex; each operation is
//!   per-record atomic (cascades run in a transaction)

mod change_queue;
mod error;
mod local_store;

pub use change_queue::{ChangeQueue, PendingChange};
pub use error::{StoreError, StoreResult};
pub use local_store::LocalStore;
