//! Local store for the offline dataset
//!
//! One SQLite file per installation holding the syncable rows, the device
//! identity, the watermark, and the locally-observed half of the sync log.
//! Timestamps are stored as unix milliseconds and converted to `chrono`
//! types at the module boundary.

mod identity;
mod migrations;
mod outbox;

pub use outbox::{ConflictResolution, TableApply};

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Wrapper around the local SQLite connection.
///
/// Not `Sync`; callers that share a store between the orchestrator and the
/// poller wrap it in a mutex (see [`crate::sync::Syncer`]).
pub struct LocalStore {
    pub(crate) conn: Connection,
}

impl LocalStore {
    /// Open (and migrate) the local store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.configure()?;
        migrations::run(&store.conn)?;
        Ok(store)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.configure()?;
        migrations::run(&store.conn)?;
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }
}

pub(crate) fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let store = LocalStore::open_in_memory().unwrap();
        // All sync tables must exist after open.
        for table in ["sync_meta", "records", "held_records", "sync_log"] {
            let count: i64 = store
                .conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn millis_round_trip() {
        let now = Utc::now();
        let round = from_millis(to_millis(now));
        assert_eq!(round.timestamp_millis(), now.timestamp_millis());
    }
}
