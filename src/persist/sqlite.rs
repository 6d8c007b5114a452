//! SQLite-backed append-only contact journal.

use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use log::{error, info};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    core::store::{ContactStore, StoreSnapshotV1},
    op::{Op, StoredOp, StoredOpEnvelope},
    types::{ContactId, OpSeq},
};

use super::{OpSink, PersistError, PersistResult};

const SCHEMA_VERSION: u32 = 1;
const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: StoreSnapshotV1,
}

/// SQLite implementation of [`crate::persist::OpSink`].
pub struct SqliteOpSink {
    conn: Connection,
}

impl SqliteOpSink {
    /// Opens or creates a journal at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let started_at = Instant::now();
        let opened = Connection::open(path)
            .map_err(PersistError::from)
            .and_then(Self::init_connection);
        log_open("file", started_at, &opened);
        opened
    }

    /// Opens an in-memory journal.
    pub fn open_in_memory() -> PersistResult<Self> {
        let started_at = Instant::now();
        let opened = Connection::open_in_memory()
            .map_err(PersistError::from)
            .and_then(Self::init_connection);
        log_open("memory", started_at, &opened);
        opened
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(PersistError::Message(format!(
                "journal schema version {version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds store state from the latest snapshot plus tail events.
    pub fn load_store(&self) -> PersistResult<ContactStore> {
        let started_at = Instant::now();
        let (mut store, start_seq) = match self.load_latest_snapshot()? {
            Some((snapshot, last_seq)) => (ContactStore::from_snapshot(snapshot)?, last_seq),
            None => (ContactStore::new(), 0),
        };

        let events = self.load_events_after(start_seq)?;
        let replayed = events.len();
        for event in events {
            store.apply_replayed_op(event)?;
        }

        info!(
            "event=journal_replay module=persist status=ok from_seq={} replayed={} contacts={} duration_ms={}",
            start_seq,
            replayed,
            store.len(),
            started_at.elapsed().as_millis()
        );
        Ok(store)
    }

    /// Loads events strictly after `seq`.
    pub fn load_events_after(&self, seq: OpSeq) -> PersistResult<Vec<StoredOp>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM events WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut op = decode_stored_op_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            op.seq = seq as OpSeq;
            op.ts_ms = ts_ms as u64;
            Ok(op)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    pub fn write_snapshot(
        &mut self,
        snapshot: &StoreSnapshotV1,
        last_seq: OpSeq,
    ) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        info!(
            "event=journal_snapshot module=persist status=ok last_seq={} contacts={}",
            last_seq,
            snapshot.records.len()
        );
        Ok(())
    }

    /// Deletes events up to and including `seq`.
    pub fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", params![seq as i64])?;
        info!("event=journal_compact module=persist status=ok through_seq={seq} removed={count}");
        Ok(count)
    }

    /// Returns the latest sequence persisted in the events table.
    pub fn latest_seq(&self) -> PersistResult<OpSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as OpSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<(StoreSnapshotV1, OpSeq)>> {
        let row: Option<(i64, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT last_seq, payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((last_seq, payload)) = row else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some((env.snapshot, last_seq as OpSeq)))
    }
}

impl OpSink for SqliteOpSink {
    fn append_ops(&mut self, ops: &[StoredOp]) -> PersistResult<OpSeq> {
        if ops.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events(seq, ts_ms, kind, contact_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in ops {
                let payload = serde_json::to_vec(&StoredOpEnvelope::new(stored.clone()))?;
                let (kind, contact_id) = op_kind_and_id(&stored.op);
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    kind,
                    contact_id as i64,
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(ops.last().map(|o| o.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1, last_seq: OpSeq) -> PersistResult<()> {
        SqliteOpSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: OpSeq) -> PersistResult<usize> {
        SqliteOpSink::compact_through(self, seq)
    }
}

fn log_open(mode: &str, started_at: Instant, opened: &PersistResult<SqliteOpSink>) {
    match opened {
        Ok(_) => info!(
            "event=journal_open module=persist status=ok mode={mode} duration_ms={}",
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=journal_open module=persist status=error mode={mode} duration_ms={} error={err}",
            started_at.elapsed().as_millis()
        ),
    }
}

fn op_kind_and_id(op: &Op) -> (i64, ContactId) {
    match op {
        Op::Put { contact, .. } => (1, contact.id),
        Op::Delete { id } => (2, *id),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn decode_stored_op_payload(payload: &[u8]) -> Result<StoredOp, String> {
    let envelope = serde_json::from_slice::<StoredOpEnvelope>(payload)
        .map_err(|e| format!("op payload decode failed: {e}"))?;
    if envelope.format_version != crate::op::OP_FORMAT_VERSION {
        return Err(format!(
            "unsupported op format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
