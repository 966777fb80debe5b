//! Reconciliation service
//!
//! Merges pushed batches into canonical storage keyed by record uuid,
//! computes pull deltas since a requested watermark, and records every
//! outcome in an append-only sync log. The uniqueness constraint on
//! `(table_name, uuid)` is the serialization point for concurrent devices:
//! the loser of a collision is rejected as a conflict, never overwritten.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use paykeep_core::models::{LogAction, LogStatus, SyncLogEntry};
use paykeep_core::tables::is_syncable;
use paykeep_core::wire::{PushRow, RejectedRow, RemoteRow, SyncMode};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::AppError;

const CONFLICT_REASON: &str = "remote updated after local edit began";

/// Per-record outcome of one merged push batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub accepted: BTreeMap<String, Vec<String>>,
    pub rejected: BTreeMap<String, Vec<RejectedRow>>,
}

/// Canonical storage plus the durable sync log and server mode.
pub struct ReconcileStore {
    conn: Connection,
}

impl ReconcileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
            BEGIN;

            CREATE TABLE IF NOT EXISTS records (
                table_name TEXT NOT NULL,
                uuid       TEXT NOT NULL,
                payload    TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                device_id  TEXT NOT NULL,
                PRIMARY KEY (table_name, uuid)
            );

            CREATE INDEX IF NOT EXISTS idx_records_updated_at
                ON records (updated_at);

            -- Append-only audit trail; rows are never updated or deleted.
            CREATE TABLE IF NOT EXISTS sync_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                action      TEXT NOT NULL,
                status      TEXT NOT NULL,
                table_name  TEXT,
                record_uuid TEXT,
                reason      TEXT,
                timestamp   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS server_state (
                id             INTEGER PRIMARY KEY CHECK (id = 1),
                mode           TEXT NOT NULL,
                last_sync_time INTEGER
            );

            INSERT OR IGNORE INTO server_state (id, mode, last_sync_time)
                VALUES (1, 'ONLINE', NULL);

            CREATE TABLE IF NOT EXISTS devices (
                device_id  TEXT PRIMARY KEY,
                first_seen INTEGER NOT NULL,
                last_seen  INTEGER NOT NULL
            );

            COMMIT;",
        )?;
        Ok(())
    }

    /// Merge one pushed batch. Rejection is per record; the batch always
    /// proceeds. The device is marked SYNCING until it acknowledges its new
    /// watermark, so a stuck cycle is visible from `/sync/status`.
    pub fn merge_push(
        &mut self,
        device_id: &str,
        tables: &BTreeMap<String, Vec<PushRow>>,
    ) -> Result<PushReport, AppError> {
        if device_id.trim().is_empty() {
            return Err(AppError::bad_request("deviceId must not be empty"));
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut report = PushReport::default();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO devices (device_id, first_seen, last_seen) VALUES (?, ?, ?)
             ON CONFLICT(device_id) DO UPDATE SET last_seen = excluded.last_seen",
            params![device_id, now_ms, now_ms],
        )?;
        tx.execute("UPDATE server_state SET mode = 'SYNCING' WHERE id = 1", [])?;

        for (table, rows) in tables {
            if !is_syncable(table) {
                let reason = format!("table is not syncable: {table}");
                insert_log(
                    &tx,
                    &SyncLogEntry::batch_error(LogAction::Push, Some(table.clone()), reason.clone()),
                )?;
                for row in rows {
                    report
                        .rejected
                        .entry(table.clone())
                        .or_default()
                        .push(RejectedRow {
                            uuid: row.uuid.clone(),
                            reason: reason.clone(),
                        });
                }
                continue;
            }

            for row in rows {
                if Uuid::parse_str(&row.uuid).is_err() {
                    let reason = "invalid record uuid".to_string();
                    insert_log(
                        &tx,
                        &SyncLogEntry::batch_error(
                            LogAction::Push,
                            Some(table.clone()),
                            format!("{reason}: {}", row.uuid),
                        ),
                    )?;
                    report
                        .rejected
                        .entry(table.clone())
                        .or_default()
                        .push(RejectedRow {
                            uuid: row.uuid.clone(),
                            reason,
                        });
                    continue;
                }

                let stored_ms: Option<i64> = tx
                    .query_row(
                        "SELECT updated_at FROM records WHERE table_name = ? AND uuid = ?",
                        params![table, row.uuid],
                        |r| r.get(0),
                    )
                    .optional()?;

                // The client is authoritative only for rows edited from the
                // current server version. Equal timestamps mean the edit
                // started from the version we hold, so they pass; only a
                // strictly newer stored row wins.
                let stale = match (stored_ms, row.base_updated_at) {
                    (None, _) => false,
                    (Some(stored), Some(base)) => stored > base.timestamp_millis(),
                    (Some(_), None) => true,
                };

                if stale {
                    insert_log(
                        &tx,
                        &SyncLogEntry::conflict(
                            LogAction::Push,
                            table.clone(),
                            row.uuid.clone(),
                            CONFLICT_REASON,
                        ),
                    )?;
                    report
                        .rejected
                        .entry(table.clone())
                        .or_default()
                        .push(RejectedRow {
                            uuid: row.uuid.clone(),
                            reason: CONFLICT_REASON.to_string(),
                        });
                    continue;
                }

                tx.execute(
                    "INSERT INTO records (table_name, uuid, payload, updated_at, device_id)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(table_name, uuid) DO UPDATE SET
                         payload = excluded.payload,
                         updated_at = excluded.updated_at,
                         device_id = excluded.device_id",
                    params![table, row.uuid, row.payload.to_string(), now_ms, device_id],
                )?;
                insert_log(
                    &tx,
                    &SyncLogEntry::success(LogAction::Push, table.clone(), row.uuid.clone()),
                )?;
                report
                    .accepted
                    .entry(table.clone())
                    .or_default()
                    .push(row.uuid.clone());
            }
        }

        tx.commit()?;
        Ok(report)
    }

    /// Rows whose server-stamped `updated_at` is strictly after `since`,
    /// grouped per table, plus the server clock the client should adopt as
    /// its new watermark.
    pub fn delta_since(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<(BTreeMap<String, Vec<RemoteRow>>, DateTime<Utc>), AppError> {
        let now = Utc::now();
        let since_ms = since.map_or(i64::MIN, |ts| ts.timestamp_millis());

        let mut stmt = self.conn.prepare(
            "SELECT table_name, uuid, payload, updated_at FROM records
             WHERE updated_at > ?
             ORDER BY table_name, updated_at, uuid",
        )?;
        let rows = stmt
            .query_map(params![since_ms], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tables: BTreeMap<String, Vec<RemoteRow>> = BTreeMap::new();
        let mut delivered = 0;
        for (table, uuid, payload, updated_at) in rows {
            delivered += 1;
            tables.entry(table).or_default().push(RemoteRow {
                uuid,
                payload: serde_json::from_str(&payload)?,
                updated_at: from_millis(updated_at),
            });
        }

        self.conn.execute(
            "UPDATE devices SET last_seen = ? WHERE device_id = ?",
            params![now.timestamp_millis(), device_id],
        )?;
        insert_log(
            &self.conn,
            &SyncLogEntry {
                action: LogAction::Pull,
                status: LogStatus::Success,
                table_name: None,
                record_uuid: None,
                reason: Some(format!(
                    "delivered {delivered} rows across {} tables",
                    tables.len()
                )),
                timestamp: now,
            },
        )?;

        Ok((tables, now))
    }

    /// Current server-reported mode and last acknowledged sync time.
    pub fn status(&self) -> Result<(SyncMode, Option<DateTime<Utc>>), AppError> {
        let (mode, last_ms): (String, Option<i64>) = self.conn.query_row(
            "SELECT mode, last_sync_time FROM server_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let mode = SyncMode::parse(&mode)
            .ok_or_else(|| AppError::internal(format!("corrupt server mode: {mode}")))?;
        Ok((mode, last_ms.map(from_millis)))
    }

    /// Record a device's adoption of a new watermark and leave SYNCING.
    /// Monotonic: an older acknowledgment never moves the clock back.
    pub fn acknowledge(&self, last_sync_time: DateTime<Utc>) -> Result<(), AppError> {
        self.conn.execute(
            "UPDATE server_state SET
                 mode = 'ONLINE',
                 last_sync_time = MAX(COALESCE(last_sync_time, 0), ?)
             WHERE id = 1",
            params![last_sync_time.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Most recent log entries, newest first.
    pub fn logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT action, status, table_name, record_uuid, reason, timestamp
             FROM sync_log ORDER BY id DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(action, status, table_name, record_uuid, reason, timestamp)| {
                Ok(SyncLogEntry {
                    action: LogAction::parse(&action).ok_or_else(|| {
                        AppError::internal(format!("corrupt log action: {action}"))
                    })?,
                    status: LogStatus::parse(&status).ok_or_else(|| {
                        AppError::internal(format!("corrupt log status: {status}"))
                    })?,
                    table_name,
                    record_uuid,
                    reason,
                    timestamp: from_millis(timestamp),
                })
            })
            .collect()
    }

    /// Administrative recovery: force the reported mode back to ONLINE.
    /// Logged, and performs no reconciliation of its own.
    pub fn reset(&self) -> Result<(), AppError> {
        self.conn
            .execute("UPDATE server_state SET mode = 'ONLINE' WHERE id = 1", [])?;
        insert_log(
            &self.conn,
            &SyncLogEntry {
                action: LogAction::Reset,
                status: LogStatus::Success,
                table_name: None,
                record_uuid: None,
                reason: Some("emergency reset requested".to_string()),
                timestamp: Utc::now(),
            },
        )?;
        tracing::warn!("emergency reset: server mode forced to ONLINE");
        Ok(())
    }
}

fn insert_log(conn: &Connection, entry: &SyncLogEntry) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO sync_log (action, status, table_name, record_uuid, reason, timestamp)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            entry.action.as_str(),
            entry.status.as_str(),
            entry.table_name,
            entry.record_uuid,
            entry.reason,
            entry.timestamp.timestamp_millis()
        ],
    )?;
    Ok(())
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
