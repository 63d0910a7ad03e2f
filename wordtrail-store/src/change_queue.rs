//! The change queue: a derived, ordered view of pending work.
//!
//! There is no separate operation log. The queue is computed live from the
//! store's dirty/pending-op markers, which is what makes the collapse rules
//! hold by construction: repeated edits are one `Update`, edits over an
//! unsynced insert are one `Insert` with the latest values, and an insert
//! followed by a delete was already purged before it could queue.

use crate::error::StoreResult;
use crate::local_store::LocalStore;
use wordtrail_model::SyncRecord;
use wordtrail_types::{EntityId, EntityKind, HybridTimestamp, OwnerId, PendingOp};

/// One operation awaiting a push, snapshotting the record's current state.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    pub id: EntityId,
    pub kind: EntityKind,
    pub op: PendingOp,
    pub owner_id: OwnerId,
    pub parent_id: Option<EntityId>,
    pub payload: serde_json::Value,
    pub updated_at: HybridTimestamp,
}

impl PendingChange {
    fn from_record(record: SyncRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            op: record.pending_op,
            owner_id: record.owner_id,
            parent_id: record.parent_id,
            payload: record.payload,
            updated_at: record.updated_at,
        }
    }
}

/// Derives the ordered list of operations a drain pass should push.
pub struct ChangeQueue;

impl ChangeQueue {
    /// Collects pending operations for an owner.
    ///
    /// Ordering: kind drain rank first (books before the words nested under
    /// them, so remote foreign-key constraints hold on insert and parent
    /// deletes cascade validly), then FIFO by `updated_at` within a kind.
    /// Quarantined records never appear; permanently failed records only
    /// when `include_failed` (a force-sync retry).
    pub fn collect(
        store: &LocalStore,
        owner_id: OwnerId,
        include_failed: bool,
    ) -> StoreResult<Vec<PendingChange>> {
        let mut records = store.dirty_records(owner_id, include_failed)?;
        records.sort_by(|a, b| {
            a.kind
                .drain_rank()
                .cmp(&b.kind.drain_rank())
                .then(a.updated_at.cmp(&b.updated_at))
        });
        Ok(records.into_iter().map(PendingChange::from_record).collect())
    }
}
