//! SQLite-backed state store.
//!
//! Two tables with two operations: `snapshots` holds exactly one active row
//! that each control tick replaces atomically, `history` is append-only with
//! one row per tick. Payloads are JSON; readers always receive fresh
//! deserialized copies.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{HistoryPoint, SnapshotPayload};

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open state database at {path}"))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS snapshots (
                 id        INTEGER PRIMARY KEY CHECK (id = 1),
                 timestamp TEXT NOT NULL,
                 payload   TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS history (
                 id        INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 payload   TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history (timestamp);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Atomically replace the single latest snapshot.
    pub fn replace_snapshot(&self, payload: &SnapshotPayload) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        self.conn.lock().execute(
            "INSERT INTO snapshots (id, timestamp, payload) VALUES (1, ?1, ?2)
             ON CONFLICT (id) DO UPDATE SET timestamp = excluded.timestamp,
                                            payload = excluded.payload",
            params![payload.timestamp.to_rfc3339(), json],
        )?;
        Ok(())
    }

    pub fn latest_snapshot(&self) -> Result<Option<SnapshotPayload>> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row("SELECT payload FROM snapshots WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        json.map(|j| serde_json::from_str(&j).context("corrupt snapshot payload"))
            .transpose()
    }

    pub fn append_history(&self, point: &HistoryPoint) -> Result<()> {
        let json = serde_json::to_string(point)?;
        self.conn.lock().execute(
            "INSERT INTO history (timestamp, payload) VALUES (?1, ?2)",
            params![point.timestamp.to_rfc3339(), json],
        )?;
        Ok(())
    }

    /// History rows at or after `since`, ascending by insertion order.
    pub fn history_since(&self, since: DateTime<Utc>) -> Result<Vec<HistoryPoint>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT payload FROM history WHERE timestamp >= ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut points = Vec::new();
        for row in rows {
            points.push(serde_json::from_str(&row?).context("corrupt history payload")?);
        }
        Ok(points)
    }
}
