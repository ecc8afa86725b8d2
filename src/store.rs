//! SQLite-backed durable log store.
//!
//! Rows live in a single `logs` table keyed by group. A batch claim is a
//! `batch_id` value written into the claimed rows; claimed rows are
//! invisible to `count` and `get_logs` until the claim is released by
//! `clear_pending_state` or the rows are deleted. Claims persist across
//! process restarts, which is why the channel releases them all at
//! construction time.
//!
//! The store is not thread-safe; all access goes through the
//! [`AsyncStore`](crate::async_store::AsyncStore) worker.

use crate::error::ChannelError;
use crate::log::LogRecord;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS logs (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    grp      TEXT NOT NULL,
    payload  TEXT NOT NULL,
    batch_id TEXT
);
CREATE INDEX IF NOT EXISTS ix_logs_group_batch ON logs (grp, batch_id);
";

pub struct SqliteStore {
    conn: Connection,
    max_records: Option<usize>,
}

impl SqliteStore {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory store; contents die with the connection.
    pub fn open_in_memory() -> Result<Self, ChannelError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, ChannelError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            max_records: None,
        })
    }

    /// Bound the store to `max_records` rows; `put` evicts oldest rows
    /// (claimed or not) to stay under the bound.
    pub fn set_max_records(&mut self, max_records: Option<usize>) {
        self.max_records = max_records;
    }

    /// Serialize and persist one record under `group`.
    pub fn put(&mut self, group: &str, log: &LogRecord) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(log)?;
        if let Some(cap) = self.max_records {
            let mut total: usize =
                self.conn
                    .query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
            while total >= cap.max(1) {
                self.conn.execute(
                    "DELETE FROM logs WHERE id = (SELECT MIN(id) FROM logs)",
                    [],
                )?;
                total -= 1;
                warn!(group, "log storage full, evicted oldest record");
            }
        }
        self.conn.execute(
            "INSERT INTO logs (grp, payload) VALUES (?1, ?2)",
            params![group, payload],
        )?;
        Ok(())
    }

    /// Number of persisted records for `group` not claimed by any batch.
    pub fn count(&self, group: &str) -> Result<usize, ChannelError> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM logs WHERE grp = ?1 AND batch_id IS NULL",
            params![group],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Claim up to `limit` oldest unclaimed records under a fresh batch id,
    /// appending them to `out` in insertion order.
    ///
    /// Rows whose payload no longer deserializes are deleted and skipped.
    /// Returns `None` when no records are available.
    pub fn get_logs(
        &mut self,
        group: &str,
        limit: usize,
        out: &mut Vec<LogRecord>,
    ) -> Result<Option<String>, ChannelError> {
        let mut rows: Vec<(i64, String)> = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id, payload FROM logs
                 WHERE grp = ?1 AND batch_id IS NULL
                 ORDER BY id ASC LIMIT ?2",
            )?;
            let mapped = stmt.query_map(params![group, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in mapped {
                rows.push(row?);
            }
        }

        let mut claimed_ids: Vec<i64> = Vec::with_capacity(rows.len());
        let mut logs: Vec<LogRecord> = Vec::with_capacity(rows.len());
        for (id, payload) in rows {
            match serde_json::from_str::<LogRecord>(&payload) {
                Ok(log) => {
                    claimed_ids.push(id);
                    logs.push(log);
                }
                Err(e) => {
                    warn!(group, id, error = %e, "dropping undecodable log row");
                    self.conn
                        .execute("DELETE FROM logs WHERE id = ?1", params![id])?;
                }
            }
        }

        if claimed_ids.is_empty() {
            return Ok(None);
        }

        let batch_id = Uuid::new_v4().to_string();
        let id_list = claimed_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.conn.execute(
            &format!("UPDATE logs SET batch_id = ?1 WHERE id IN ({id_list})"),
            params![batch_id],
        )?;
        out.append(&mut logs);
        Ok(Some(batch_id))
    }

    /// Permanently remove the rows claimed by `batch_id`.
    pub fn delete_batch(&mut self, group: &str, batch_id: &str) -> Result<(), ChannelError> {
        self.conn.execute(
            "DELETE FROM logs WHERE grp = ?1 AND batch_id = ?2",
            params![group, batch_id],
        )?;
        Ok(())
    }

    /// Permanently remove all rows for `group`.
    pub fn delete_all(&mut self, group: &str) -> Result<(), ChannelError> {
        self.conn
            .execute("DELETE FROM logs WHERE grp = ?1", params![group])?;
        Ok(())
    }

    /// Release every open batch claim; row data is untouched.
    pub fn clear_pending_state(&mut self) -> Result<(), ChannelError> {
        self.conn
            .execute("UPDATE logs SET batch_id = NULL WHERE batch_id IS NOT NULL", [])?;
        Ok(())
    }
}
