use crate::Syncable;
use serde::{Deserialize, Serialize};
use wordtrail_types::{EntityId, EntityKind, HybridTimestamp, OwnerId, PendingOp};

/// The stored representation of a synchronized record: the sync envelope
/// plus the domain fields as an opaque JSON payload.
///
/// Invariants maintained by the store:
/// - at most one live (non-tombstoned) record per id
/// - `pending_op == Delete` implies `tombstoned`
/// - `!dirty && pending_op == None` implies the payload matches the last
///   known remote state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub owner_id: OwnerId,
    pub parent_id: Option<EntityId>,
    pub payload: serde_json::Value,
    pub updated_at: HybridTimestamp,
    pub dirty: bool,
    pub pending_op: PendingOp,
    pub tombstoned: bool,
    pub sync_failed: bool,
    pub quarantined: bool,
}

impl SyncRecord {
    /// Builds a clean (synced) record around a payload. The store flips the
    /// dirty/pending fields as mutations come in.
    pub fn clean(
        kind: EntityKind,
        id: EntityId,
        owner_id: OwnerId,
        parent_id: Option<EntityId>,
        payload: serde_json::Value,
        updated_at: HybridTimestamp,
    ) -> Self {
        Self {
            id,
            kind,
            owner_id,
            parent_id,
            payload,
            updated_at,
            dirty: false,
            pending_op: PendingOp::None,
            tombstoned: false,
            sync_failed: false,
            quarantined: false,
        }
    }

    /// Serializes a domain value into a clean record envelope.
    pub fn from_syncable<T: Syncable>(
        owner_id: OwnerId,
        value: &T,
    ) -> wordtrail_types::Result<Self> {
        Ok(Self::clean(
            T::KIND,
            value.id(),
            owner_id,
            value.parent_id(),
            serde_json::to_value(value)?,
            HybridTimestamp::now(),
        ))
    }

    /// Deserializes the payload back into its domain type.
    pub fn decode<T: Syncable>(&self) -> wordtrail_types::Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Whether the record is visible to reads (not soft-deleted).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.tombstoned
    }

    /// Whether the record has an operation eligible for the change queue.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.dirty && self.pending_op != PendingOp::None && !self.quarantined
    }

    /// Whether the record is known to match the last confirmed remote state.
    #[must_use]
    pub fn matches_remote(&self) -> bool {
        !self.dirty && self.pending_op == PendingOp::None
    }
}
