use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wordtrail_model::{Book, VocabWord};
use wordtrail_store::LocalStore;
use wordtrail_sync::mock::MockRemoteClient;
use wordtrail_sync::{
    MonitorConfig, NetworkMonitor, PushOutcome, RemoteError, RemoteRecord, SyncConfig, SyncEngine,
    SyncPhase,
};
use wordtrail_types::{EntityId, EntityKind, HybridTimestamp, OwnerId, PendingOp};

struct Harness {
    store: Arc<LocalStore>,
    remote: Arc<MockRemoteClient>,
    monitor: Arc<NetworkMonitor>,
    engine: Arc<SyncEngine>,
    owner: OwnerId,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(LocalStore::open_in_memory().unwrap()))
    }

    fn with_store(store: Arc<LocalStore>) -> Self {
        let remote = Arc::new(MockRemoteClient::new());
        let monitor = Arc::new(NetworkMonitor::new(MonitorConfig {
            debounce: Duration::from_millis(20),
        }));
        let engine = SyncEngine::new(
            store.clone(),
            remote.clone(),
            monitor.clone(),
            OwnerId::new(),
            SyncConfig {
                backoff_base: Duration::from_millis(50),
                backoff_cap: Duration::from_secs(1),
                max_attempts: 3,
            },
        );
        let owner = engine.owner_id();
        Self {
            store,
            remote,
            monitor,
            engine,
            owner,
        }
    }

    fn start(&self) -> JoinHandle<()> {
        tokio::spawn(self.engine.clone().run())
    }

    async fn connect(&self) {
        self.monitor.report(true);
        let mut rx = self.monitor.watch();
        timeout(Duration::from_secs(5), rx.wait_for(|connected| *connected))
            .await
            .expect("connect timed out")
            .unwrap();
    }

    async fn disconnect(&self) {
        self.monitor.report(false);
        let mut rx = self.monitor.watch();
        timeout(Duration::from_secs(5), rx.wait_for(|connected| !connected))
            .await
            .expect("disconnect timed out")
            .unwrap();
    }

    fn is_clean(&self, id: EntityId) -> bool {
        self.store
            .get(id)
            .unwrap()
            .is_some_and(|record| record.matches_remote())
    }

    fn is_gone(&self, id: EntityId) -> bool {
        self.store.get(id).unwrap().is_none()
    }

    async fn wait_phase(&self, want: impl Fn(&SyncPhase) -> bool) {
        let mut rx = self.engine.status();
        timeout(Duration::from_secs(5), rx.wait_for(|status| want(&status.phase)))
            .await
            .expect("phase not reached")
            .unwrap();
    }
}

/// Polls a condition under paused time until it holds.
async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {what}"));
}

// ── Scenario: offline insert, reconnect, one push ────────────────

#[tokio::test(start_paused = true)]
async fn offline_insert_is_pushed_exactly_once_on_reconnect() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Ulysses");
    h.store.save(h.owner, &book, true).unwrap();
    let word = VocabWord::new(book.id, "ephemeral", "lasting a very short time");
    h.store.save(h.owner, &word, true).unwrap();

    h.connect().await;
    wait_until("both records clean", || {
        h.is_clean(book.id) && h.is_clean(word.id)
    })
    .await;

    // Parent pushed before child, one push each.
    let pushed: Vec<EntityId> = h.remote.pushes().iter().map(|change| change.id).collect();
    assert_eq!(pushed, vec![book.id, word.id]);

    // No stray re-pushes after settling.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.remote.push_count(book.id), 1);
    assert_eq!(h.remote.push_count(word.id), 1);
}

// ── Scenario: offline edits collapse ─────────────────────────────

#[tokio::test(start_paused = true)]
async fn offline_edits_collapse_to_one_update_with_final_values() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Dune");
    let mut word = VocabWord::new(book.id, "melange", "the spice");
    h.store.save(h.owner, &book, true).unwrap();
    h.store.save(h.owner, &word, true).unwrap();
    h.connect().await;
    wait_until("initial sync", || h.is_clean(word.id)).await;

    h.disconnect().await;
    for mastered in [true, false, true] {
        word.mastered = mastered;
        h.store.save(h.owner, &word, true).unwrap();
    }

    h.connect().await;
    wait_until("word clean again", || h.is_clean(word.id)).await;

    // One insert plus exactly one collapsed update.
    assert_eq!(h.remote.push_count(word.id), 2);
    let last = h.remote.pushes().into_iter().last().unwrap();
    assert_eq!(last.op, PendingOp::Update);
    assert_eq!(last.payload["mastered"], serde_json::json!(true));
}

// ── Scenario: cascade delete rides the parent ────────────────────

#[tokio::test(start_paused = true)]
async fn cascade_delete_pushes_only_the_parent_delete() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Dune");
    h.store.save(h.owner, &book, true).unwrap();
    let mut words = Vec::new();
    for term in ["melange", "gom jabbar", "kwisatz"] {
        let word = VocabWord::new(book.id, term, "…");
        h.store.save(h.owner, &word, true).unwrap();
        words.push(word);
    }
    h.connect().await;
    wait_until("initial sync", || {
        h.is_clean(book.id) && words.iter().all(|w| h.is_clean(w.id))
    })
    .await;

    h.disconnect().await;
    // Words picked up edits before the book is deleted offline.
    for word in &mut words {
        word.mastered = true;
        h.store.save(h.owner, word, true).unwrap();
    }
    h.store.soft_delete(book.id).unwrap();

    // Everything is gone from reads immediately.
    assert!(h.store.fetch_all::<Book>(h.owner).unwrap().is_empty());
    assert!(h.store.fetch_by_parent::<VocabWord>(book.id).unwrap().is_empty());

    h.connect().await;
    wait_until("tombstones purged", || {
        h.is_gone(book.id) && words.iter().all(|w| h.is_gone(w.id))
    })
    .await;

    // The book saw its insert and its delete; each word only its insert —
    // the word deletes rode the cascade.
    assert_eq!(h.remote.push_count(book.id), 2);
    let last = h.remote.pushes().into_iter().last().unwrap();
    assert_eq!(last.id, book.id);
    assert_eq!(last.op, PendingOp::Delete);
    for word in &words {
        assert_eq!(h.remote.push_count(word.id), 1);
    }
}

// ── Scenario: auth expiry halts the drain ────────────────────────

#[tokio::test(start_paused = true)]
async fn auth_expiry_halts_drain_and_parks_the_engine() {
    let h = Harness::new();
    h.start();

    let books: Vec<Book> = (1..=5).map(|n| Book::new(format!("Book {n}"))).collect();
    for book in &books {
        h.store.save(h.owner, book, true).unwrap();
    }
    h.remote
        .script_push(books[1].id, Err(RemoteError::AuthExpired));

    h.connect().await;
    h.wait_phase(|phase| matches!(phase, SyncPhase::AuthRequired)).await;

    // Record 1 synced; 2–5 still dirty; 3–5 never attempted.
    wait_until("first book clean", || h.is_clean(books[0].id)).await;
    for book in &books[1..] {
        assert!(!h.is_clean(book.id));
    }
    assert_eq!(h.remote.push_count(books[1].id), 1);
    for book in &books[2..] {
        assert_eq!(h.remote.push_count(book.id), 0);
    }

    // Parked: further mutations do not restart the drain.
    h.store.save(h.owner, &Book::new("Book 6"), true).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.remote.push_count(books[2].id), 0);

    // Re-authentication resumes where we left off.
    h.engine.credentials_refreshed();
    wait_until("all books clean", || {
        books.iter().all(|book| h.is_clean(book.id))
    })
    .await;
}

// ── Permanent failure does not block the rest ────────────────────

#[tokio::test(start_paused = true)]
async fn permanent_rejection_flags_the_record_and_continues() {
    let h = Harness::new();
    h.start();

    let good = Book::new("Good");
    let bad = Book::new("Bad");
    let also_good = Book::new("Also Good");
    for book in [&good, &bad, &also_good] {
        h.store.save(h.owner, book, true).unwrap();
    }
    h.remote.script_push(
        bad.id,
        Err(RemoteError::Permanent("validation failed".into())),
    );

    h.connect().await;
    wait_until("good records clean", || {
        h.is_clean(good.id) && h.is_clean(also_good.id)
    })
    .await;

    let record = h.store.get(bad.id).unwrap().unwrap();
    assert!(record.dirty);
    assert!(record.sync_failed);

    let mut rx = h.engine.status();
    timeout(Duration::from_secs(5), rx.wait_for(|status| status.failed == 1))
        .await
        .expect("failed count not published")
        .unwrap();

    // Only a force retries the failed record.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.remote.push_count(bad.id), 1);
    h.engine.force_sync();
    wait_until("bad record recovered", || h.is_clean(bad.id)).await;
}

// ── Transient failure backs off and retries ──────────────────────

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_with_backoff() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Walden");
    h.store.save(h.owner, &book, true).unwrap();
    h.remote
        .script_push(book.id, Err(RemoteError::Transient("timeout".into())));

    h.connect().await;
    wait_until("book clean after retry", || h.is_clean(book.id)).await;
    assert_eq!(h.remote.push_count(book.id), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_bounded_and_leave_the_record_dirty() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Walden");
    h.store.save(h.owner, &book, true).unwrap();
    // Initial attempt plus max_attempts retries, all failing.
    for _ in 0..4 {
        h.remote
            .script_push(book.id, Err(RemoteError::Transient("503".into())));
    }

    h.connect().await;
    wait_until("engine gave up", || h.remote.push_count(book.id) == 4).await;
    h.wait_phase(|phase| matches!(phase, SyncPhase::Idle)).await;

    let status = h.engine.status().borrow().clone();
    assert!(status.last_error.is_some());
    assert!(!h.is_clean(book.id));
}

// ── Conflict resolution ──────────────────────────────────────────

fn remote_copy(book: &Book, owner: OwnerId, updated_at: HybridTimestamp) -> RemoteRecord {
    RemoteRecord {
        id: book.id,
        kind: EntityKind::Book,
        owner_id: owner,
        parent_id: None,
        deleted: false,
        updated_at,
        payload: serde_json::to_value(book).unwrap(),
    }
}

#[tokio::test(start_paused = true)]
async fn newer_remote_wins_and_overwrites_local() {
    let h = Harness::new();
    h.start();

    let mut book = Book::new("Local Title");
    h.store.save(h.owner, &book, true).unwrap();
    h.connect().await;
    wait_until("initial sync", || h.is_clean(book.id)).await;

    h.disconnect().await;
    book.title = "Local Edit".into();
    h.store.save(h.owner, &book, true).unwrap();

    let local_ts = h.store.get(book.id).unwrap().unwrap().updated_at;
    let mut remote_book = book.clone();
    remote_book.title = "Remote Edit".into();
    h.remote.script_push(
        book.id,
        Ok(PushOutcome::Conflict {
            remote: remote_copy(&remote_book, h.owner, local_ts.tick()),
        }),
    );

    h.connect().await;
    wait_until("conflict resolved", || h.is_clean(book.id)).await;

    let books = h.store.fetch_all::<Book>(h.owner).unwrap();
    assert_eq!(books[0].title, "Remote Edit");
    // The losing local edit was discarded, not re-pushed.
    assert_eq!(h.remote.push_count(book.id), 2);
}

#[tokio::test(start_paused = true)]
async fn newer_local_wins_and_is_repushed() {
    let h = Harness::new();
    h.start();

    let mut book = Book::new("Local Title");
    h.store.save(h.owner, &book, true).unwrap();
    h.connect().await;
    wait_until("initial sync", || h.is_clean(book.id)).await;

    h.disconnect().await;
    book.title = "Local Edit".into();
    h.store.save(h.owner, &book, true).unwrap();

    let mut stale = book.clone();
    stale.title = "Stale".into();
    let stale_remote = remote_copy(&stale, h.owner, HybridTimestamp::from_parts(1, 0));
    h.remote
        .script_push(book.id, Ok(PushOutcome::Conflict { remote: stale_remote }));

    h.connect().await;
    wait_until("conflict resolved", || h.is_clean(book.id)).await;

    // insert, conflicted update, reconciled re-push
    assert_eq!(h.remote.push_count(book.id), 3);
    let last = h.remote.pushes().into_iter().last().unwrap();
    assert_eq!(last.payload["title"], serde_json::json!("Local Edit"));

    let books = h.store.fetch_all::<Book>(h.owner).unwrap();
    assert_eq!(books[0].title, "Local Edit");
}

#[tokio::test(start_paused = true)]
async fn local_delete_wins_over_concurrent_remote_update() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Doomed");
    h.store.save(h.owner, &book, true).unwrap();
    h.connect().await;
    wait_until("initial sync", || h.is_clean(book.id)).await;

    h.disconnect().await;
    h.store.soft_delete(book.id).unwrap();

    let local_ts = h.store.get(book.id).unwrap().unwrap().updated_at;
    let mut remote_book = book.clone();
    remote_book.title = "Remote Edit".into();
    h.remote.script_push(
        book.id,
        Ok(PushOutcome::Conflict {
            remote: remote_copy(&remote_book, h.owner, local_ts.tick()),
        }),
    );

    h.connect().await;
    wait_until("delete finalized", || h.is_gone(book.id)).await;

    // insert, conflicted delete, reconciled delete — the delete is final.
    assert_eq!(h.remote.push_count(book.id), 3);
    let last = h.remote.pushes().into_iter().last().unwrap();
    assert_eq!(last.op, PendingOp::Delete);
}

#[tokio::test(start_paused = true)]
async fn remote_delete_wins_over_concurrent_local_update() {
    let h = Harness::new();
    h.start();

    let mut book = Book::new("Doomed");
    h.store.save(h.owner, &book, true).unwrap();
    h.connect().await;
    wait_until("initial sync", || h.is_clean(book.id)).await;

    h.disconnect().await;
    book.title = "Local Edit".into();
    h.store.save(h.owner, &book, true).unwrap();

    let local_ts = h.store.get(book.id).unwrap().unwrap().updated_at;
    let remote = RemoteRecord {
        deleted: true,
        ..remote_copy(&book, h.owner, local_ts.tick())
    };
    h.remote
        .script_push(book.id, Ok(PushOutcome::Conflict { remote }));

    h.connect().await;
    wait_until("local record removed", || h.is_gone(book.id)).await;
    assert_eq!(h.remote.push_count(book.id), 2);
}

// ── Flap tolerance ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connectivity_flaps_never_duplicate_a_push() {
    let h = Harness::new();
    h.start();

    let book = Book::new("Walden");
    h.store.save(h.owner, &book, true).unwrap();

    // Rapid flaps inside the debounce window, then a stable connection.
    for _ in 0..3 {
        h.monitor.report(true);
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.monitor.report(false);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.monitor.report(true);

    wait_until("book clean", || h.is_clean(book.id)).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.remote.push_count(book.id), 1);
}

// ── Cancellation ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_inflight_push_finish_and_stops_the_rest() {
    let h = Harness::new();
    let handle = h.start();

    let first = Book::new("First");
    let second = Book::new("Second");
    h.store.save(h.owner, &first, true).unwrap();
    h.store.save(h.owner, &second, true).unwrap();

    let gate = Arc::new(Semaphore::new(0));
    h.remote.set_gate(gate.clone());

    h.connect().await;
    wait_until("first push in flight", || h.remote.started_count() == 1).await;

    h.engine.shutdown();
    gate.add_permits(10);

    handle.await.unwrap();

    // The in-flight record completed and was confirmed; the next one was
    // never scheduled and stays dirty for the next launch.
    assert!(h.is_clean(first.id));
    assert_eq!(h.remote.push_count(second.id), 0);
    assert!(!h.is_clean(second.id));
}

// ── Mid-drain edits are never lost ───────────────────────────────

#[tokio::test(start_paused = true)]
async fn edit_during_inflight_push_is_resynced_not_lost() {
    let h = Harness::new();
    h.start();

    let mut book = Book::new("Walden");
    h.store.save(h.owner, &book, true).unwrap();

    let gate = Arc::new(Semaphore::new(0));
    h.remote.set_gate(gate.clone());

    h.connect().await;
    wait_until("push in flight", || h.remote.started_count() == 1).await;

    // Edit while the insert is on the wire.
    book.author = Some("Thoreau".into());
    h.store.save(h.owner, &book, true).unwrap();
    gate.add_permits(100);

    wait_until("final state synced", || {
        h.is_clean(book.id) && h.remote.push_count(book.id) == 2
    })
    .await;

    let last = h.remote.pushes().into_iter().last().unwrap();
    assert_eq!(last.payload["author"], serde_json::json!("Thoreau"));
}

// ── Force sync pulls remote state ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn force_sync_hydrates_from_the_remote() {
    let h = Harness::new();
    h.start();
    h.connect().await;

    let remote_book = Book::new("From The Cloud");
    h.remote.set_pull(
        EntityKind::Book,
        vec![remote_copy(&remote_book, h.owner, HybridTimestamp::now())],
    );

    h.engine.force_sync();
    wait_until("book hydrated", || {
        !h.store.fetch_all::<Book>(h.owner).unwrap().is_empty()
    })
    .await;

    // All kinds were pulled, and the hydrated record is clean.
    assert_eq!(h.remote.pulls().len(), EntityKind::ALL.len());
    assert!(h.is_clean(remote_book.id));
}

#[tokio::test(start_paused = true)]
async fn pull_does_not_clobber_a_newer_dirty_record() {
    let h = Harness::new();
    h.start();
    h.connect().await;

    let mut book = Book::new("Local Title");
    h.store.save(h.owner, &book, true).unwrap();
    wait_until("initial sync", || h.is_clean(book.id)).await;

    h.disconnect().await;
    book.title = "Local Edit".into();
    h.store.save(h.owner, &book, true).unwrap();

    // The remote still has the stale copy.
    let mut stale = book.clone();
    stale.title = "Stale Remote".into();
    h.remote.set_pull(
        EntityKind::Book,
        vec![remote_copy(&stale, h.owner, HybridTimestamp::from_parts(1, 0))],
    );

    h.connect().await;
    h.engine.force_sync();
    wait_until("local edit synced", || h.is_clean(book.id)).await;

    let books = h.store.fetch_all::<Book>(h.owner).unwrap();
    assert_eq!(books[0].title, "Local Edit");
}

// ── Restart durability ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dirty_records_drain_on_next_launch_without_intervention() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wordtrail.db");

    let owner;
    let book = Book::new("Walden");
    {
        let store = LocalStore::open(&path).unwrap();
        owner = OwnerId::new();
        store.save(owner, &book, true).unwrap();
        // Process dies with the record still dirty.
    }

    let store = Arc::new(LocalStore::open(&path).unwrap());
    let remote = Arc::new(MockRemoteClient::new());
    let monitor = Arc::new(NetworkMonitor::new(MonitorConfig {
        debounce: Duration::from_millis(20),
    }));
    let engine = SyncEngine::new(
        store.clone(),
        remote.clone(),
        monitor.clone(),
        owner,
        SyncConfig::default(),
    );

    monitor.report(true);
    let mut rx = monitor.watch();
    timeout(Duration::from_secs(5), rx.wait_for(|connected| *connected))
        .await
        .unwrap()
        .unwrap();

    tokio::spawn(engine.clone().run());
    wait_until("record drained on launch", || {
        store
            .get(book.id)
            .unwrap()
            .is_some_and(|record| record.matches_remote())
    })
    .await;
    assert_eq!(remote.push_count(book.id), 1);
}

// ── Status surface ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn offline_status_reports_pending_mutations() {
    let h = Harness::new();
    h.start();
    h.wait_phase(|phase| matches!(phase, SyncPhase::Offline)).await;

    h.store.save(h.owner, &Book::new("Walden"), true).unwrap();
    let mut rx = h.engine.status();
    timeout(
        Duration::from_secs(5),
        rx.wait_for(|status| status.pending == 1),
    )
    .await
    .expect("pending count not published")
    .unwrap();

    let status = h.engine.status().borrow().clone();
    assert_eq!(status.phase, SyncPhase::Offline);
    assert_eq!(status.pending, 1);
}
