//! The remote store contract.
//!
//! The engine is written against this trait; the production implementation
//! is [`HttpRemoteClient`](crate::HttpRemoteClient) and tests use
//! [`mock::MockRemoteClient`]. The contract is deliberately small: push one
//! classified operation, pull one kind. Everything else (endpoints, auth,
//! retries) belongs to the implementation or the engine.

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wordtrail_store::PendingChange;
use wordtrail_types::{EntityId, EntityKind, HybridTimestamp, OwnerId};

/// A record as the remote store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: EntityId,
    pub kind: EntityKind,
    pub owner_id: OwnerId,
    pub parent_id: Option<EntityId>,
    /// The remote kept a tombstone for this record.
    pub deleted: bool,
    pub updated_at: HybridTimestamp,
    pub payload: serde_json::Value,
}

/// What the remote did with a pushed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The operation was accepted; the record now matches the push.
    Applied {
        /// The timestamp the remote recorded, to reconcile locally.
        remote_updated_at: HybridTimestamp,
    },
    /// The remote holds a diverged copy and rejected the write.
    /// Resolution (last-write-wins) is the engine's job.
    Conflict { remote: RemoteRecord },
}

/// Client for the authoritative remote store.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Pushes one pending operation.
    ///
    /// Inserts must be upserts: repeating an insert with the same
    /// client-assigned id must not create a duplicate. Deletes of an
    /// already-deleted record must succeed.
    async fn push(&self, change: &PendingChange) -> Result<PushOutcome, RemoteError>;

    /// Fetches all of the owner's records of one kind, tombstones included
    /// where the backend keeps them.
    async fn pull(
        &self,
        kind: EntityKind,
        owner_id: OwnerId,
    ) -> Result<Vec<RemoteRecord>, RemoteError>;
}

/// A mock remote for testing.
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// A scriptable [`RemoteClient`] that records every call.
    ///
    /// Unscripted pushes succeed, echoing the pushed timestamp back as the
    /// remote-confirmed one. Scripted outcomes for an id are consumed in
    /// order, then the default applies again.
    #[derive(Default)]
    pub struct MockRemoteClient {
        scripted: Mutex<HashMap<EntityId, VecDeque<Result<PushOutcome, RemoteError>>>>,
        pushes: Mutex<Vec<PendingChange>>,
        pulls: Mutex<Vec<EntityKind>>,
        pull_results: Mutex<HashMap<EntityKind, Vec<RemoteRecord>>>,
        started: AtomicUsize,
        gate: Mutex<Option<Arc<Semaphore>>>,
    }

    impl MockRemoteClient {
        /// Creates a mock where every push succeeds.
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues an outcome for the next push of `id`.
        pub fn script_push(&self, id: EntityId, outcome: Result<PushOutcome, RemoteError>) {
            self.scripted
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .push_back(outcome);
        }

        /// Sets the records a pull of `kind` returns.
        pub fn set_pull(&self, kind: EntityKind, records: Vec<RemoteRecord>) {
            self.pull_results.lock().unwrap().insert(kind, records);
        }

        /// Makes every push wait for a permit before completing, so tests
        /// can hold an in-flight call open.
        pub fn set_gate(&self, gate: Arc<Semaphore>) {
            *self.gate.lock().unwrap() = Some(gate);
        }

        /// Every push received so far, in order.
        pub fn pushes(&self) -> Vec<PendingChange> {
            self.pushes.lock().unwrap().clone()
        }

        /// How many pushes targeted `id`.
        pub fn push_count(&self, id: EntityId) -> usize {
            self.pushes
                .lock()
                .unwrap()
                .iter()
                .filter(|change| change.id == id)
                .count()
        }

        /// How many pushes have started (including any still gated).
        pub fn started_count(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        /// Every kind pulled so far, in order.
        pub fn pulls(&self) -> Vec<EntityKind> {
            self.pulls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteClient for MockRemoteClient {
        async fn push(&self, change: &PendingChange) -> Result<PushOutcome, RemoteError> {
            self.started.fetch_add(1, Ordering::SeqCst);

            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire_owned().await.unwrap().forget();
            }

            self.pushes.lock().unwrap().push(change.clone());

            let scripted = self
                .scripted
                .lock()
                .unwrap()
                .get_mut(&change.id)
                .and_then(VecDeque::pop_front);
            match scripted {
                Some(outcome) => outcome,
                None => Ok(PushOutcome::Applied {
                    remote_updated_at: change.updated_at,
                }),
            }
        }

        async fn pull(
            &self,
            kind: EntityKind,
            _owner_id: OwnerId,
        ) -> Result<Vec<RemoteRecord>, RemoteError> {
            self.pulls.lock().unwrap().push(kind);
            Ok(self
                .pull_results
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_default())
        }
    }
}
