//! The sync orchestrator.
//!
//! One engine runs per user session, as a single background task. It reacts
//! to connectivity transitions, store mutations, and explicit triggers by
//! draining the change queue against the remote, resolving conflicts by
//! last-write-wins, and publishing its state through a watch channel.
//!
//! Exactly one drain is ever in flight: triggers arriving mid-drain are
//! coalesced into "run again after this pass" rather than interleaved.

use crate::error::RemoteError;
use crate::network::NetworkMonitor;
use crate::remote::{PushOutcome, RemoteClient, RemoteRecord};
use crate::status::{SyncPhase, SyncStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};
use wordtrail_model::SyncRecord;
use wordtrail_store::{ChangeQueue, LocalStore, PendingChange, StoreResult};
use wordtrail_types::{EntityKind, HybridTimestamp, OwnerId, PendingOp};

/// Tuning for the drain loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// First retry delay after a transient failure.
    pub backoff_base: Duration,
    /// Upper bound on the retry delay.
    pub backoff_cap: Duration,
    /// Transient retries before surfacing a persistent failure.
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(300),
            max_attempts: 6,
        }
    }
}

/// How a single drain pass ended.
enum PassOutcome {
    /// Queue fully drained (permanent rejections excepted).
    Drained,
    /// Shutdown arrived; the in-flight record finished, the rest did not run.
    Cancelled,
    /// The session expired mid-drain.
    AuthRequired,
    /// A transient failure aborted the pass.
    Transient(String),
}

/// The offline-first sync engine.
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteClient>,
    monitor: Arc<NetworkMonitor>,
    owner_id: OwnerId,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
    trigger: Notify,
    force_requested: AtomicBool,
    /// Latched on an expired session; parks the drain loop until
    /// re-authentication (or an explicit force) clears it.
    auth_required: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl SyncEngine {
    /// Creates an engine. Call [`run`](Self::run) on a spawned task to
    /// start it.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteClient>,
        monitor: Arc<NetworkMonitor>,
        owner_id: OwnerId,
        config: SyncConfig,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(SyncStatus::initial(monitor.is_connected()));
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            store,
            remote,
            monitor,
            owner_id,
            config,
            status,
            trigger: Notify::new(),
            force_requested: AtomicBool::new(false),
            auth_required: AtomicBool::new(false),
            shutdown,
        })
    }

    /// The owner this engine syncs for.
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Subscribes to the engine's observable status.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Manual trigger (pull-to-refresh). Also retries permanently failed
    /// records and hydrates local state from the remote.
    pub fn force_sync(&self) {
        self.force_requested.store(true, Ordering::SeqCst);
        self.auth_required.store(false, Ordering::SeqCst);
        self.trigger.notify_one();
    }

    /// Tells a parked engine that re-authentication completed.
    pub fn credentials_refreshed(&self) {
        self.auth_required.store(false, Ordering::SeqCst);
        self.trigger.notify_one();
    }

    /// Stops the engine. The in-flight push (if any) completes; no further
    /// records are scheduled.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.trigger.notify_one();
    }

    fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn publish(&self, phase: SyncPhase, last_error: Option<String>) {
        let pending = self.store.pending_count(self.owner_id).unwrap_or(0);
        let failed = self.store.failed_count(self.owner_id).unwrap_or(0);
        self.status.send_replace(SyncStatus {
            phase,
            pending,
            failed,
            last_error,
        });
    }

    // ── Run loop ─────────────────────────────────────────────────

    /// The engine's single long-lived task. Returns when
    /// [`shutdown`](Self::shutdown) is called.
    pub async fn run(self: Arc<Self>) {
        let mut conn_rx = self.monitor.watch();
        let mut store_rx = self.store.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();

        // Restart durability: dirty records found at startup drain as soon
        // as we are connected, without user intervention.
        if self.monitor.is_connected() {
            self.drain_until_settled(&mut shutdown_rx).await;
        } else {
            self.publish(SyncPhase::Offline, None);
        }

        loop {
            if self.cancelled() {
                break;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = conn_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *conn_rx.borrow_and_update() {
                        info!("connectivity restored; draining");
                        self.drain_until_settled(&mut shutdown_rx).await;
                    } else {
                        info!("connectivity lost");
                        self.publish(SyncPhase::Offline, None);
                    }
                }
                changed = store_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    store_rx.borrow_and_update();
                    if self.monitor.is_connected() {
                        self.drain_until_settled(&mut shutdown_rx).await;
                    } else {
                        // Keep the pending badge honest while offline.
                        self.publish(SyncPhase::Offline, None);
                    }
                }
                _ = self.trigger.notified() => {
                    if self.cancelled() {
                        break;
                    }
                    if self.monitor.is_connected() {
                        self.drain_until_settled(&mut shutdown_rx).await;
                    } else {
                        self.publish(SyncPhase::Offline, None);
                    }
                }
            }
        }

        self.publish(SyncPhase::Idle, None);
        debug!("sync engine stopped");
    }

    /// Drains until the queue is empty, the retries are exhausted, or
    /// something halts the pass.
    async fn drain_until_settled(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut conn_rx = self.monitor.watch();
        let mut attempt: u32 = 0;
        // A force request survives backoff retries within this settle loop,
        // so its pull phase is not lost to one transient failure.
        let mut forced = false;

        loop {
            if self.cancelled() {
                self.publish(SyncPhase::Idle, None);
                return;
            }
            if self.auth_required.load(Ordering::SeqCst) {
                self.publish(
                    SyncPhase::AuthRequired,
                    Some("authentication expired".to_string()),
                );
                return;
            }
            if self.force_requested.swap(false, Ordering::SeqCst) {
                forced = true;
            }

            let queue = match ChangeQueue::collect(&self.store, self.owner_id, forced) {
                Ok(queue) => queue,
                Err(e) => {
                    warn!("failed to derive change queue: {e}");
                    self.publish(SyncPhase::Idle, Some(e.to_string()));
                    return;
                }
            };
            // Wakeups with nothing to do (including our own bookkeeping
            // writes) settle without flickering through Syncing.
            if queue.is_empty() && !forced {
                self.publish(SyncPhase::Idle, None);
                return;
            }

            self.publish(SyncPhase::Syncing, None);
            match self.drain_pass(queue, forced).await {
                PassOutcome::Drained => {
                    info!("drain complete");
                    self.publish(SyncPhase::Idle, None);
                    return;
                }
                PassOutcome::Cancelled => {
                    self.publish(SyncPhase::Idle, None);
                    return;
                }
                PassOutcome::AuthRequired => {
                    warn!("authentication expired; drain halted");
                    self.auth_required.store(true, Ordering::SeqCst);
                    self.publish(
                        SyncPhase::AuthRequired,
                        Some("authentication expired".to_string()),
                    );
                    return;
                }
                PassOutcome::Transient(message) => {
                    attempt += 1;
                    if attempt > self.config.max_attempts {
                        warn!(
                            "giving up after {} transient failures: {message}",
                            attempt - 1
                        );
                        self.publish(SyncPhase::Idle, Some(message));
                        return;
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!("transient failure, retry {attempt} in {delay:?}: {message}");
                    self.publish(
                        SyncPhase::Backoff {
                            attempt,
                            until_ms: epoch_ms_after(delay),
                        },
                        Some(message),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = conn_rx.changed() => { let _ = changed; }
                        _ = self.trigger.notified() => {}
                        changed = shutdown_rx.changed() => { let _ = changed; }
                    }
                    if self.cancelled() {
                        self.publish(SyncPhase::Idle, None);
                        return;
                    }
                    if !self.monitor.is_connected() {
                        self.publish(SyncPhase::Offline, None);
                        return;
                    }
                }
            }
        }
    }

    /// Retry delay for the given attempt: base × 2^(attempt-1), capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.backoff_cap)
    }

    // ── Drain pass ───────────────────────────────────────────────

    async fn drain_pass(&self, queue: Vec<PendingChange>, force: bool) -> PassOutcome {
        info!("draining {} pending operations", queue.len());

        for change in queue {
            // Cancellation stops scheduling, never an in-flight push.
            if self.cancelled() {
                debug!("drain cancelled before {}", change.id);
                return PassOutcome::Cancelled;
            }

            match self.remote.push(&change).await {
                Ok(PushOutcome::Applied { remote_updated_at }) => {
                    if let Err(e) = self.confirm(&change, remote_updated_at) {
                        warn!("storage fault confirming {}: {e}; quarantining", change.id);
                        let _ = self.store.quarantine(change.id);
                    }
                }
                Ok(PushOutcome::Conflict { remote }) => {
                    if let Err(outcome) = self.resolve_conflict(&change, remote).await {
                        return outcome;
                    }
                }
                Err(RemoteError::Transient(message)) => {
                    debug!("transient failure pushing {}: {message}", change.id);
                    return PassOutcome::Transient(message);
                }
                Err(RemoteError::Permanent(message)) => {
                    warn!("remote rejected {}: {message}", change.id);
                    if let Err(e) = self.store.mark_failed(change.id) {
                        warn!("storage fault flagging {}: {e}; quarantining", change.id);
                        let _ = self.store.quarantine(change.id);
                    }
                }
                Err(RemoteError::AuthExpired) => {
                    return PassOutcome::AuthRequired;
                }
            }
        }

        if force {
            if let Err(outcome) = self.pull_phase().await {
                return outcome;
            }
        }

        PassOutcome::Drained
    }

    /// Records a confirmed push. Deletes purge the tombstone (and its
    /// cascade riders); everything else clears the dirty state unless a
    /// newer local edit landed mid-push.
    fn confirm(
        &self,
        change: &PendingChange,
        remote_updated_at: HybridTimestamp,
    ) -> StoreResult<()> {
        if change.op == PendingOp::Delete {
            self.store.purge(change.id)
        } else {
            let confirmed =
                self.store
                    .confirm_pushed(change.id, change.updated_at, remote_updated_at)?;
            if !confirmed {
                debug!("{} edited during push; next pass re-syncs it", change.id);
            }
            Ok(())
        }
    }

    // ── Conflict resolution ──────────────────────────────────────

    /// Last-write-wins by `updated_at`, with deletes always final.
    /// `Err` carries the pass outcome when resolution cannot continue.
    async fn resolve_conflict(
        &self,
        change: &PendingChange,
        remote: RemoteRecord,
    ) -> Result<(), PassOutcome> {
        if change.op == PendingOp::Delete {
            debug!("conflict on {}: local delete wins", change.id);
            return self.repush_past(change, &remote).await;
        }

        if remote.deleted {
            // The remote delete wins over our concurrent edit.
            debug!("conflict on {}: remote delete wins", change.id);
            if let Err(e) = self.store.remove(change.id) {
                warn!("storage fault removing {}: {e}; quarantining", change.id);
                let _ = self.store.quarantine(change.id);
            }
            return Ok(());
        }

        if remote.updated_at > change.updated_at {
            debug!("conflict on {}: remote is newer, accepting remote state", change.id);
            if let Err(e) = self.store.apply_remote(&clean_record(&remote)) {
                warn!("storage fault applying remote {}: {e}; quarantining", change.id);
                let _ = self.store.quarantine(change.id);
            }
            Ok(())
        } else {
            debug!("conflict on {}: local is newer or equal, re-pushing", change.id);
            self.repush_past(change, &remote).await
        }
    }

    /// Re-pushes a change with its timestamp advanced past the remote's,
    /// so the remote's own last-write-wins check accepts it.
    async fn repush_past(
        &self,
        change: &PendingChange,
        remote: &RemoteRecord,
    ) -> Result<(), PassOutcome> {
        let advanced_at = change.updated_at.receive(&remote.updated_at);

        // Persist the advanced timestamp first so confirmation can
        // compare-and-clear against it.
        match self
            .store
            .advance_updated_at(change.id, change.updated_at, advanced_at)
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} edited during conflict resolution; deferring", change.id);
                return Ok(());
            }
            Err(e) => {
                warn!("storage fault advancing {}: {e}; quarantining", change.id);
                let _ = self.store.quarantine(change.id);
                return Ok(());
            }
        }

        let mut advanced = change.clone();
        advanced.updated_at = advanced_at;

        match self.remote.push(&advanced).await {
            Ok(PushOutcome::Applied { remote_updated_at }) => {
                if let Err(e) = self.confirm(&advanced, remote_updated_at) {
                    warn!("storage fault confirming {}: {e}; quarantining", change.id);
                    let _ = self.store.quarantine(change.id);
                }
                Ok(())
            }
            Ok(PushOutcome::Conflict { .. }) => {
                // The remote moved again mid-resolution. Retry the whole
                // pass later rather than ping-ponging here.
                Err(PassOutcome::Transient(format!(
                    "repeated conflict on {}",
                    change.id
                )))
            }
            Err(RemoteError::Transient(message)) => Err(PassOutcome::Transient(message)),
            Err(RemoteError::Permanent(message)) => {
                warn!("remote rejected reconciled {}: {message}", change.id);
                let _ = self.store.mark_failed(change.id);
                Ok(())
            }
            Err(RemoteError::AuthExpired) => Err(PassOutcome::AuthRequired),
        }
    }

    // ── Pull (force-sync hydration) ──────────────────────────────

    /// Hydrates local state from the remote: last-write-wins against the
    /// local copy (so a stale read replica can never regress state), with
    /// deletes final in both directions.
    async fn pull_phase(&self) -> Result<(), PassOutcome> {
        for kind in EntityKind::ALL {
            let records = match self.remote.pull(kind, self.owner_id).await {
                Ok(records) => records,
                Err(RemoteError::Transient(message)) => {
                    return Err(PassOutcome::Transient(message));
                }
                Err(RemoteError::AuthExpired) => return Err(PassOutcome::AuthRequired),
                Err(RemoteError::Permanent(message)) => {
                    warn!("pull of {kind} rejected: {message}");
                    continue;
                }
            };
            debug!("pulled {} {kind} records", records.len());
            for remote in records {
                if let Err(e) = self.apply_pulled(&remote) {
                    warn!("storage fault applying pulled {}: {e}", remote.id);
                }
            }
        }
        Ok(())
    }

    fn apply_pulled(&self, remote: &RemoteRecord) -> StoreResult<()> {
        match self.store.get(remote.id)? {
            None => {
                if !remote.deleted {
                    self.store.apply_remote(&clean_record(remote))?;
                }
            }
            Some(local) => {
                if local.pending_op == PendingOp::Delete {
                    // Local deletes are final; the push path finishes the
                    // job. A remote tombstone just confirms it early.
                    if remote.deleted {
                        self.store.remove(remote.id)?;
                    }
                    return Ok(());
                }
                if remote.deleted {
                    self.store.remove(remote.id)?;
                    return Ok(());
                }
                // Strictly newer only: an equal or older copy is either the
                // state we already have or a stale read.
                if remote.updated_at > local.updated_at {
                    self.store.apply_remote(&clean_record(remote))?;
                }
            }
        }
        Ok(())
    }
}

fn clean_record(remote: &RemoteRecord) -> SyncRecord {
    SyncRecord::clean(
        remote.kind,
        remote.id,
        remote.owner_id,
        remote.parent_id,
        remote.payload.clone(),
        remote.updated_at,
    )
}

fn epoch_ms_after(delay: Duration) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    now + delay.as_millis() as u64
}
