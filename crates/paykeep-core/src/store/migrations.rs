//! Local store migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    debug_assert!(get_version(conn)? == CURRENT_VERSION);
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: identity, records, held rows, local sync log
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;

        CREATE TABLE schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Device identity and watermark, one value per key.
        CREATE TABLE sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Local copy of every syncable row. `dirty` never crosses the wire.
        CREATE TABLE records (
            table_name      TEXT NOT NULL,
            uuid            TEXT NOT NULL,
            payload         TEXT NOT NULL,
            updated_at      INTEGER NOT NULL,
            base_updated_at INTEGER,
            dirty           INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (table_name, uuid)
        );

        CREATE INDEX idx_records_dirty ON records (dirty) WHERE dirty = 1;

        -- Incoming rows parked because the local copy was dirty at pull time.
        CREATE TABLE held_records (
            table_name TEXT NOT NULL,
            uuid       TEXT NOT NULL,
            payload    TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            held_at    INTEGER NOT NULL,
            PRIMARY KEY (table_name, uuid)
        );

        -- Append-only, locally-observed sync outcomes.
        CREATE TABLE sync_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            action      TEXT NOT NULL,
            status      TEXT NOT NULL,
            table_name  TEXT,
            record_uuid TEXT,
            reason      TEXT,
            timestamp   INTEGER NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;",
    )?;

    tracing::debug!("local store migrated to schema v1");
    Ok(())
}
