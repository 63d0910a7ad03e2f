//! The on-device record store.
//!
//! Backed by a single SQLite file (or memory, for tests). Each record row
//! carries the sync envelope columns next to its JSON payload; the change
//! queue and the engine both read and write through this API, never around
//! it, so the dirty/tombstone state has a single writer discipline.

use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::debug;
use wordtrail_model::{SyncRecord, Syncable};
use wordtrail_types::{EntityId, EntityKind, HybridTimestamp, OwnerId, PendingOp};

const SELECT_COLUMNS: &str = "id, kind, owner_id, parent_id, payload, \
     updated_wall, updated_logical, dirty, pending_op, tombstoned, \
     sync_failed, quarantined";

/// Durable, per-user keyed storage for synchronized records.
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
    /// Generation counter bumped on every local mutation; the sync engine
    /// subscribes to this as its "new mutation while connected" trigger.
    changes: watch::Sender<u64>,
}

impl LocalStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let (changes, _) = watch::channel(0);
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                parent_id TEXT,
                payload TEXT NOT NULL,
                updated_wall INTEGER NOT NULL,
                updated_logical INTEGER NOT NULL,
                dirty INTEGER NOT NULL DEFAULT 0,
                pending_op TEXT NOT NULL DEFAULT 'none',
                tombstoned INTEGER NOT NULL DEFAULT 0,
                sync_failed INTEGER NOT NULL DEFAULT 0,
                quarantined INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_records_owner_kind
                ON records(owner_id, kind);
            CREATE INDEX IF NOT EXISTS idx_records_parent
                ON records(parent_id);
            CREATE INDEX IF NOT EXISTS idx_records_dirty
                ON records(owner_id, dirty);
            ",
        )?;
        Ok(())
    }

    /// Subscribes to the store's generation counter, bumped on every
    /// mutation (local edits and remote-applied state alike). The UI uses
    /// this to re-read; the engine uses it as a drain trigger.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn mark_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    // ── Writes (ViewModel path) ──────────────────────────────────

    /// Upserts a domain value by id.
    ///
    /// With `needs_sync`, the record is marked dirty and its pending op
    /// becomes `Insert` (new id) or `Update` (existing id; an unsynced
    /// insert stays an insert carrying the latest values). `updated_at`
    /// advances on every call. Saving identical content twice is a no-op
    /// beyond the timestamp refresh.
    pub fn save<T: Syncable>(
        &self,
        owner_id: OwnerId,
        value: &T,
        needs_sync: bool,
    ) -> StoreResult<SyncRecord> {
        let payload = serde_json::to_value(value)?;
        let id = value.id();

        let record = {
            let conn = self.conn.lock().unwrap();
            let record = match Self::load_row(&conn, id)? {
                Some(prev) => {
                    if prev.tombstoned {
                        return Err(StoreError::Deleted(id));
                    }
                    let pending_op = if needs_sync {
                        if prev.pending_op == PendingOp::Insert {
                            PendingOp::Insert
                        } else {
                            PendingOp::Update
                        }
                    } else {
                        prev.pending_op
                    };
                    SyncRecord {
                        parent_id: value.parent_id(),
                        payload,
                        updated_at: prev.updated_at.tick(),
                        dirty: needs_sync || prev.dirty,
                        pending_op,
                        // A fresh edit may fix whatever the remote rejected.
                        sync_failed: if needs_sync { false } else { prev.sync_failed },
                        ..prev
                    }
                }
                None => {
                    let mut record = SyncRecord::clean(
                        T::KIND,
                        id,
                        owner_id,
                        value.parent_id(),
                        payload,
                        HybridTimestamp::now(),
                    );
                    if needs_sync {
                        record.dirty = true;
                        record.pending_op = PendingOp::Insert;
                    }
                    record
                }
            };
            Self::upsert_row(&conn, &record)?;
            record
        };

        debug!("saved {} {} (op={})", record.kind, id, record.pending_op);
        self.mark_changed();
        Ok(record)
    }

    /// Soft-deletes a record: tombstones it, queues a `Delete`, and cascades
    /// to children. Children never queue their own delete — they ride the
    /// parent's remote cascade. A record the remote has never seen is purged
    /// outright, along with its children, and nothing is pushed.
    pub fn soft_delete(&self, id: EntityId) -> StoreResult<()> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            let record = match Self::load_row(&tx, id)? {
                Some(record) => record,
                None => return Err(StoreError::NotFound(id)),
            };
            if record.tombstoned {
                return Ok(());
            }

            let id_str = id.to_string();
            if record.pending_op == PendingOp::Insert {
                tx.execute(
                    "DELETE FROM records WHERE parent_id = ?1",
                    params![id_str],
                )?;
                tx.execute("DELETE FROM records WHERE id = ?1", params![id_str])?;
                debug!("purged unsynced {} {} and children", record.kind, id);
            } else {
                let ts = record.updated_at.tick();
                tx.execute(
                    "UPDATE records SET tombstoned = 1, pending_op = 'delete', dirty = 1, \
                     sync_failed = 0, updated_wall = ?2, updated_logical = ?3 WHERE id = ?1",
                    params![id_str, ts.wall_time() as i64, ts.logical() as i64],
                )?;
                // Children the remote has never seen vanish with the parent;
                // the rest are tombstoned with no op of their own.
                tx.execute(
                    "DELETE FROM records WHERE parent_id = ?1 AND pending_op = 'insert'",
                    params![id_str],
                )?;
                tx.execute(
                    "UPDATE records SET tombstoned = 1, pending_op = 'none', dirty = 1 \
                     WHERE parent_id = ?1",
                    params![id_str],
                )?;
                debug!("tombstoned {} {} with cascade", record.kind, id);
            }

            tx.commit()?;
        }
        self.mark_changed();
        Ok(())
    }

    // ── Reads (UI path) ──────────────────────────────────────────

    /// All live records of a type for an owner, in insertion order.
    pub fn fetch_all<T: Syncable>(&self, owner_id: OwnerId) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM records \
             WHERE owner_id = ?1 AND kind = ?2 AND tombstoned = 0 ORDER BY rowid",
        )?;
        let payloads = stmt.query_map(
            params![owner_id.to_string(), T::KIND.as_str()],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for payload in payloads {
            out.push(serde_json::from_str(&payload?)?);
        }
        Ok(out)
    }

    /// All live children of a parent record, in insertion order.
    pub fn fetch_by_parent<T: Syncable>(&self, parent_id: EntityId) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM records \
             WHERE parent_id = ?1 AND kind = ?2 AND tombstoned = 0 ORDER BY rowid",
        )?;
        let payloads = stmt.query_map(
            params![parent_id.to_string(), T::KIND.as_str()],
            |row| row.get::<_, String>(0),
        )?;

        let mut out = Vec::new();
        for payload in payloads {
            out.push(serde_json::from_str(&payload?)?);
        }
        Ok(out)
    }

    /// Raw record lookup, tombstones included. Sync-engine path.
    pub fn get(&self, id: EntityId) -> StoreResult<Option<SyncRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::load_row(&conn, id)
    }

    // ── Sync bookkeeping (engine path) ───────────────────────────

    /// Clears the dirty state after a confirmed push and reconciles
    /// `updated_at` to the remote-confirmed value.
    pub fn mark_synced(
        &self,
        id: EntityId,
        remote_updated_at: HybridTimestamp,
    ) -> StoreResult<()> {
        let updated = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE records SET dirty = 0, pending_op = 'none', sync_failed = 0, \
                 updated_wall = ?2, updated_logical = ?3 WHERE id = ?1",
                params![
                    id.to_string(),
                    remote_updated_at.wall_time() as i64,
                    remote_updated_at.logical() as i64
                ],
            )?
        };
        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.mark_changed();
        Ok(())
    }

    /// Compare-and-clear variant of [`mark_synced`](Self::mark_synced) for
    /// the drain path: confirms the push only if the record still matches
    /// the pushed snapshot's timestamp. Returns `false` when a newer local
    /// edit arrived mid-push — the record stays dirty and the next pass
    /// re-pushes it.
    pub fn confirm_pushed(
        &self,
        id: EntityId,
        pushed_at: HybridTimestamp,
        remote_updated_at: HybridTimestamp,
    ) -> StoreResult<bool> {
        let updated = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE records SET dirty = 0, pending_op = 'none', sync_failed = 0, \
                 updated_wall = ?2, updated_logical = ?3 \
                 WHERE id = ?1 AND updated_wall = ?4 AND updated_logical = ?5",
                params![
                    id.to_string(),
                    remote_updated_at.wall_time() as i64,
                    remote_updated_at.logical() as i64,
                    pushed_at.wall_time() as i64,
                    pushed_at.logical() as i64
                ],
            )?
        };
        if updated > 0 {
            self.mark_changed();
        }
        Ok(updated > 0)
    }

    /// Advances a record's timestamp past a conflicting remote one while
    /// keeping its dirty state, so a reconciled re-push carries a timestamp
    /// the store agrees with. Compare-and-set on the previous timestamp;
    /// returns `false` if the record was edited meanwhile.
    pub fn advance_updated_at(
        &self,
        id: EntityId,
        expected: HybridTimestamp,
        new: HybridTimestamp,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE records SET updated_wall = ?2, updated_logical = ?3 \
             WHERE id = ?1 AND updated_wall = ?4 AND updated_logical = ?5",
            params![
                id.to_string(),
                new.wall_time() as i64,
                new.logical() as i64,
                expected.wall_time() as i64,
                expected.logical() as i64
            ],
        )?;
        Ok(updated > 0)
    }

    /// Flags a record the remote permanently rejected. It stays dirty for a
    /// manual retry but leaves the automatic drain path.
    pub fn mark_failed(&self, id: EntityId) -> StoreResult<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE records SET sync_failed = 1 WHERE id = ?1",
                params![id.to_string()],
            )?;
        }
        self.mark_changed();
        Ok(())
    }

    /// Excludes a record from all drains after a local storage fault.
    pub fn quarantine(&self, id: EntityId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE records SET quarantined = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    /// Returns a quarantined record to the drain path.
    pub fn clear_quarantine(&self, id: EntityId) -> StoreResult<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE records SET quarantined = 0 WHERE id = ?1",
                params![id.to_string()],
            )?;
        }
        self.mark_changed();
        Ok(())
    }

    /// Overwrites a record with remote-won state. The result is clean: not
    /// dirty, no pending op, any local edits discarded.
    pub fn apply_remote(&self, record: &SyncRecord) -> StoreResult<()> {
        {
            let conn = self.conn.lock().unwrap();
            Self::upsert_row(&conn, record)?;
        }
        debug!("applied remote state for {} {}", record.kind, record.id);
        self.mark_changed();
        Ok(())
    }

    /// Physically removes a tombstoned record after its remote delete was
    /// confirmed, along with children that rode the cascade.
    pub fn purge(&self, id: EntityId) -> StoreResult<()> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let id_str = id.to_string();
            tx.execute(
                "DELETE FROM records WHERE parent_id = ?1 AND tombstoned = 1",
                params![id_str],
            )?;
            tx.execute(
                "DELETE FROM records WHERE id = ?1 AND tombstoned = 1",
                params![id_str],
            )?;
            tx.commit()?;
        }
        self.mark_changed();
        Ok(())
    }

    /// Physically removes a record and its children regardless of tombstone
    /// state. Used when the remote reports the record deleted (a remote
    /// delete wins over any concurrent local edit).
    pub fn remove(&self, id: EntityId) -> StoreResult<()> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let id_str = id.to_string();
            tx.execute("DELETE FROM records WHERE parent_id = ?1", params![id_str])?;
            tx.execute("DELETE FROM records WHERE id = ?1", params![id_str])?;
            tx.commit()?;
        }
        self.mark_changed();
        Ok(())
    }

    /// Dirty records eligible for a drain pass, in insertion order.
    /// Quarantined records never appear; failed records only when asked.
    pub fn dirty_records(
        &self,
        owner_id: OwnerId,
        include_failed: bool,
    ) -> StoreResult<Vec<SyncRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM records \
             WHERE owner_id = ?1 AND dirty = 1 AND quarantined = 0 \
             AND pending_op != 'none'{} ORDER BY rowid",
            if include_failed {
                ""
            } else {
                " AND sync_failed = 0"
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id.to_string()], Self::map_raw)?;

        let mut out = Vec::new();
        for raw in rows {
            out.push(Self::parse_row(raw?)?);
        }
        Ok(out)
    }

    /// Number of records awaiting sync.
    pub fn pending_count(&self, owner_id: OwnerId) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records \
             WHERE owner_id = ?1 AND dirty = 1 AND quarantined = 0 \
             AND pending_op != 'none'",
            params![owner_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of records the remote permanently rejected.
    pub fn failed_count(&self, owner_id: OwnerId) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE owner_id = ?1 AND sync_failed = 1",
            params![owner_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether any records are awaiting sync (restart-durability check).
    pub fn has_pending(&self, owner_id: OwnerId) -> StoreResult<bool> {
        Ok(self.pending_count(owner_id)? > 0)
    }

    // ── Row mapping ──────────────────────────────────────────────

    fn load_row(conn: &Connection, id: EntityId) -> StoreResult<Option<SyncRecord>> {
        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM records WHERE id = ?1"),
                params![id.to_string()],
                Self::map_raw,
            )
            .optional()?;
        raw.map(Self::parse_row).transpose()
    }

    fn upsert_row(conn: &Connection, record: &SyncRecord) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO records (id, kind, owner_id, parent_id, payload, \
             updated_wall, updated_logical, dirty, pending_op, tombstoned, \
             sync_failed, quarantined) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(id) DO UPDATE SET \
             kind = excluded.kind, owner_id = excluded.owner_id, \
             parent_id = excluded.parent_id, payload = excluded.payload, \
             updated_wall = excluded.updated_wall, \
             updated_logical = excluded.updated_logical, \
             dirty = excluded.dirty, pending_op = excluded.pending_op, \
             tombstoned = excluded.tombstoned, \
             sync_failed = excluded.sync_failed, \
             quarantined = excluded.quarantined",
            params![
                record.id.to_string(),
                record.kind.as_str(),
                record.owner_id.to_string(),
                record.parent_id.map(|p| p.to_string()),
                serde_json::to_string(&record.payload)?,
                record.updated_at.wall_time() as i64,
                record.updated_at.logical() as i64,
                record.dirty,
                record.pending_op.as_str(),
                record.tombstoned,
                record.sync_failed,
                record.quarantined,
            ],
        )?;
        Ok(())
    }

    fn map_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            kind: row.get(1)?,
            owner_id: row.get(2)?,
            parent_id: row.get(3)?,
            payload: row.get(4)?,
            updated_wall: row.get(5)?,
            updated_logical: row.get(6)?,
            dirty: row.get(7)?,
            pending_op: row.get(8)?,
            tombstoned: row.get(9)?,
            sync_failed: row.get(10)?,
            quarantined: row.get(11)?,
        })
    }

    fn parse_row(raw: RawRow) -> StoreResult<SyncRecord> {
        let id = raw
            .id
            .parse::<EntityId>()
            .map_err(|e| StoreError::InvalidData(format!("bad id: {e}")))?;
        let kind = raw
            .kind
            .parse::<EntityKind>()
            .map_err(|e| StoreError::InvalidData(format!("bad kind: {e}")))?;
        let owner_id = raw
            .owner_id
            .parse::<OwnerId>()
            .map_err(|e| StoreError::InvalidData(format!("bad owner: {e}")))?;
        let parent_id = raw
            .parent_id
            .map(|p| p.parse::<EntityId>())
            .transpose()
            .map_err(|e| StoreError::InvalidData(format!("bad parent: {e}")))?;
        let pending_op = raw
            .pending_op
            .parse::<PendingOp>()
            .map_err(|e| StoreError::InvalidData(format!("bad op: {e}")))?;

        Ok(SyncRecord {
            id,
            kind,
            owner_id,
            parent_id,
            payload: serde_json::from_str(&raw.payload)?,
            updated_at: HybridTimestamp::from_parts(
                raw.updated_wall as u64,
                raw.updated_logical as u32,
            ),
            dirty: raw.dirty,
            pending_op,
            tombstoned: raw.tombstoned,
            sync_failed: raw.sync_failed,
            quarantined: raw.quarantined,
        })
    }
}

struct RawRow {
    id: String,
    kind: String,
    owner_id: String,
    parent_id: Option<String>,
    payload: String,
    updated_wall: i64,
    updated_logical: i64,
    dirty: bool,
    pending_op: String,
    tombstoned: bool,
    sync_failed: bool,
    quarantined: bool,
}
