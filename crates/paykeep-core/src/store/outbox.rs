//! Change tracker (outbox) and pull application
//!
//! Local edits mark rows dirty; the push pipeline gathers the dirty set per
//! allow-listed table and flags are cleared only for rows the server
//! confirmed. Pulled rows are upserted by `uuid` and never marked dirty by
//! the pull itself; a pull that collides with a dirty local row parks the
//! incoming copy in `held_records` and logs a CONFLICT.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{from_millis, to_millis, LocalStore};
use crate::error::{Error, Result};
use crate::models::{HeldRecord, LocalRecord, LogAction, LogStatus, RecordId, SyncLogEntry};
use crate::tables::is_syncable;
use crate::wire::{PushRow, RemoteRow};

/// Outcome of applying one table's pulled delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableApply {
    /// Rows upserted into local storage.
    pub applied: usize,
    /// Rows parked because the local copy was dirty.
    pub held: usize,
}

/// How to settle a parked push/pull collision on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local edit, rebased onto the parked server version so the
    /// next push offers it from the version the server actually holds.
    KeepLocal,
    /// Adopt the parked server copy and discard the local edit.
    TakeServer,
}

impl LocalStore {
    /// Create or update a row locally, marking it dirty for the next push.
    ///
    /// When `uuid` is `None` a new identifier is minted. The row's
    /// `base_updated_at` is left untouched: it still names the server
    /// version this chain of edits started from.
    pub fn upsert_local(
        &self,
        table: &str,
        uuid: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<LocalRecord> {
        if !is_syncable(table) {
            return Err(Error::TableNotSyncable(table.to_string()));
        }
        let uuid = match uuid {
            Some(value) => value
                .parse::<RecordId>()
                .map_err(|_| Error::InvalidInput(format!("invalid record uuid: {value}")))?
                .as_str(),
            None => RecordId::new().as_str(),
        };

        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO records (table_name, uuid, payload, updated_at, base_updated_at, dirty)
             VALUES (?, ?, ?, ?, NULL, 1)
             ON CONFLICT(table_name, uuid) DO UPDATE SET
                 payload = excluded.payload,
                 updated_at = excluded.updated_at,
                 dirty = 1",
            params![table, uuid, payload.to_string(), to_millis(now)],
        )?;

        self.record(table, &uuid)?
            .ok_or_else(|| Error::InvalidInput(format!("record vanished after upsert: {uuid}")))
    }

    /// Fetch a single row, if present.
    pub fn record(&self, table: &str, uuid: &str) -> Result<Option<LocalRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT table_name, uuid, payload, updated_at, base_updated_at, dirty
                 FROM records WHERE table_name = ? AND uuid = ?",
                params![table, uuid],
                Self::parse_record_raw,
            )
            .optional()?;
        row.map(Self::finish_record).transpose()
    }

    /// All rows of a table, newest first.
    pub fn list_records(&self, table: &str) -> Result<Vec<LocalRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, uuid, payload, updated_at, base_updated_at, dirty
             FROM records WHERE table_name = ?
             ORDER BY updated_at DESC, uuid",
        )?;
        let rows = stmt
            .query_map(params![table], Self::parse_record_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::finish_record).collect()
    }

    /// Number of rows currently awaiting push.
    pub fn dirty_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE dirty = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Gather the dirty set, grouped per table, for one push batch.
    pub fn pending_batch(&self) -> Result<BTreeMap<String, Vec<PushRow>>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, uuid, payload, updated_at, base_updated_at
             FROM records WHERE dirty = 1
             ORDER BY table_name, updated_at, uuid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut batch: BTreeMap<String, Vec<PushRow>> = BTreeMap::new();
        for (table, uuid, payload, updated_at, base_updated_at) in rows {
            batch.entry(table).or_default().push(PushRow {
                uuid,
                payload: serde_json::from_str(&payload)?,
                updated_at: from_millis(updated_at),
                base_updated_at: base_updated_at.map(from_millis),
            });
        }
        Ok(batch)
    }

    /// Clear the dirty flag for rows the server confirmed as accepted.
    ///
    /// Clearing is bounded by the `updated_at` each row carried when the
    /// batch was gathered: an edit that lands while the batch is in flight
    /// stays dirty and goes out with the next push. A held server copy is
    /// dropped only when the flag actually cleared; the server now carries
    /// our content, so the parked copy is stale by construction.
    pub fn clear_dirty(&self, table: &str, rows: &[(String, DateTime<Utc>)]) -> Result<usize> {
        let mut cleared = 0;
        for (uuid, pushed_at) in rows {
            let changed = self.conn.execute(
                "UPDATE records SET dirty = 0
                 WHERE table_name = ? AND uuid = ? AND dirty = 1 AND updated_at <= ?",
                params![table, uuid, to_millis(*pushed_at)],
            )?;
            if changed > 0 {
                self.conn.execute(
                    "DELETE FROM held_records WHERE table_name = ? AND uuid = ?",
                    params![table, uuid],
                )?;
            }
            cleared += changed;
        }
        Ok(cleared)
    }

    /// Apply one table's pulled delta: upsert by `uuid`, idempotent.
    ///
    /// A dirty local row is never overwritten; the incoming copy is held and
    /// the collision is logged so it stays observable from this side.
    pub fn apply_remote(&mut self, table: &str, rows: &[RemoteRow]) -> Result<TableApply> {
        let mut stats = TableApply::default();
        let now_ms = to_millis(Utc::now());
        let tx = self.conn.transaction()?;

        for row in rows {
            let dirty: Option<bool> = tx
                .query_row(
                    "SELECT dirty FROM records WHERE table_name = ? AND uuid = ?",
                    params![table, row.uuid],
                    |r| r.get::<_, i32>(0).map(|flag| flag != 0),
                )
                .optional()?;

            if dirty == Some(true) {
                tx.execute(
                    "INSERT INTO held_records (table_name, uuid, payload, updated_at, held_at)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(table_name, uuid) DO UPDATE SET
                         payload = excluded.payload,
                         updated_at = excluded.updated_at,
                         held_at = excluded.held_at",
                    params![
                        table,
                        row.uuid,
                        row.payload.to_string(),
                        to_millis(row.updated_at),
                        now_ms
                    ],
                )?;
                let entry = SyncLogEntry::conflict(
                    LogAction::Pull,
                    table,
                    row.uuid.clone(),
                    "remote row held: local copy has unpushed edits",
                );
                Self::insert_log(&tx, &entry)?;
                tracing::warn!(table, uuid = %row.uuid, "pull collided with dirty local row");
                stats.held += 1;
            } else {
                tx.execute(
                    "INSERT INTO records (table_name, uuid, payload, updated_at, base_updated_at, dirty)
                     VALUES (?, ?, ?, ?, ?, 0)
                     ON CONFLICT(table_name, uuid) DO UPDATE SET
                         payload = excluded.payload,
                         updated_at = excluded.updated_at,
                         base_updated_at = excluded.base_updated_at,
                         dirty = 0",
                    params![
                        table,
                        row.uuid,
                        row.payload.to_string(),
                        to_millis(row.updated_at),
                        to_millis(row.updated_at)
                    ],
                )?;
                tx.execute(
                    "DELETE FROM held_records WHERE table_name = ? AND uuid = ?",
                    params![table, row.uuid],
                )?;
                stats.applied += 1;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    /// Number of parked server copies awaiting resolution.
    pub fn held_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM held_records", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Parked server copies awaiting resolution, oldest hold first.
    pub fn held_records(&self) -> Result<Vec<HeldRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, uuid, payload, updated_at, held_at
             FROM held_records ORDER BY held_at, table_name, uuid",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(table_name, uuid, payload, updated_at, held_at)| {
                Ok(HeldRecord {
                    table_name,
                    uuid,
                    payload: serde_json::from_str(&payload)?,
                    updated_at: from_millis(updated_at),
                    held_at: from_millis(held_at),
                })
            })
            .collect()
    }

    /// Settle a parked collision for one record.
    ///
    /// Without this a rejected row would be re-offered with the same stale
    /// base on every cycle: the server keeps rejecting it, the pull keeps
    /// re-parking its copy, and the row never leaves the outbox.
    /// `KeepLocal` rebases `base_updated_at` onto the parked server version
    /// so the next push can win; `TakeServer` adopts the parked copy and
    /// drops the local edit. Either way the hold is consumed and the
    /// outcome logged.
    pub fn resolve_conflict(
        &mut self,
        table: &str,
        uuid: &str,
        resolution: ConflictResolution,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        let held: Option<(String, i64)> = tx
            .query_row(
                "SELECT payload, updated_at FROM held_records
                 WHERE table_name = ? AND uuid = ?",
                params![table, uuid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((payload, server_ms)) = held else {
            return Err(Error::InvalidInput(format!(
                "no held server copy for {table}/{uuid}"
            )));
        };

        let reason = match resolution {
            ConflictResolution::KeepLocal => {
                let rebased = tx.execute(
                    "UPDATE records SET base_updated_at = ?
                     WHERE table_name = ? AND uuid = ?",
                    params![server_ms, table, uuid],
                )?;
                if rebased == 0 {
                    return Err(Error::InvalidInput(format!(
                        "no local row to rebase for {table}/{uuid}"
                    )));
                }
                "conflict resolved: kept local edit"
            }
            ConflictResolution::TakeServer => {
                tx.execute(
                    "INSERT INTO records (table_name, uuid, payload, updated_at, base_updated_at, dirty)
                     VALUES (?, ?, ?, ?, ?, 0)
                     ON CONFLICT(table_name, uuid) DO UPDATE SET
                         payload = excluded.payload,
                         updated_at = excluded.updated_at,
                         base_updated_at = excluded.base_updated_at,
                         dirty = 0",
                    params![table, uuid, payload, server_ms, server_ms],
                )?;
                "conflict resolved: adopted server copy"
            }
        };

        tx.execute(
            "DELETE FROM held_records WHERE table_name = ? AND uuid = ?",
            params![table, uuid],
        )?;
        let entry = SyncLogEntry {
            action: LogAction::Pull,
            status: LogStatus::Success,
            table_name: Some(table.to_string()),
            record_uuid: Some(uuid.to_string()),
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        };
        Self::insert_log(&tx, &entry)?;
        tx.commit()?;
        tracing::info!(table, uuid, ?resolution, "resolved held conflict");
        Ok(())
    }

    /// Append an entry to the local sync log.
    pub fn append_log(&self, entry: &SyncLogEntry) -> Result<()> {
        Self::insert_log(&self.conn, entry)
    }

    /// Most recent local sync log entries, newest first.
    pub fn local_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
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
                    action: crate::models::LogAction::parse(&action)
                        .ok_or_else(|| Error::InvalidInput(format!("bad log action: {action}")))?,
                    status: crate::models::LogStatus::parse(&status)
                        .ok_or_else(|| Error::InvalidInput(format!("bad log status: {status}")))?,
                    table_name,
                    record_uuid,
                    reason,
                    timestamp: from_millis(timestamp),
                })
            })
            .collect()
    }

    fn insert_log(conn: &rusqlite::Connection, entry: &SyncLogEntry) -> Result<()> {
        conn.execute(
            "INSERT INTO sync_log (action, status, table_name, record_uuid, reason, timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                entry.action.as_str(),
                entry.status.as_str(),
                entry.table_name,
                entry.record_uuid,
                entry.reason,
                to_millis(entry.timestamp)
            ],
        )?;
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn parse_record_raw(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(String, String, String, i64, Option<i64>, i32)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn finish_record(
        (table_name, uuid, payload, updated_at, base_updated_at, dirty): (
            String,
            String,
            String,
            i64,
            Option<i64>,
            i32,
        ),
    ) -> Result<LocalRecord> {
        Ok(LocalRecord {
            table_name,
            uuid,
            payload: serde_json::from_str(&payload)?,
            updated_at: from_millis(updated_at),
            base_updated_at: base_updated_at.map(from_millis),
            dirty: dirty != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogStatus;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn remote(uuid: &str, name: &str, minutes_ago: i64) -> RemoteRow {
        RemoteRow {
            uuid: uuid.to_string(),
            payload: serde_json::json!({ "name": name }),
            updated_at: Utc::now() - TimeDelta::minutes(minutes_ago),
        }
    }

    #[test]
    fn local_edit_marks_dirty() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = store
            .upsert_local("employees", None, &serde_json::json!({"name": "Ada"}))
            .unwrap();
        assert!(record.dirty);
        assert_eq!(record.base_updated_at, None);
        assert_eq!(store.dirty_count().unwrap(), 1);
    }

    #[test]
    fn non_whitelisted_table_is_rejected() {
        let store = LocalStore::open_in_memory().unwrap();
        let error = store
            .upsert_local("audit_internal", None, &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(error, Error::TableNotSyncable(_)));
    }

    #[test]
    fn pending_batch_groups_by_table() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert_local("employees", None, &serde_json::json!({"name": "Ada"}))
            .unwrap();
        store
            .upsert_local("attendance", None, &serde_json::json!({"day": "mon"}))
            .unwrap();
        store
            .upsert_local("attendance", None, &serde_json::json!({"day": "tue"}))
            .unwrap();

        let batch = store.pending_batch().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch["employees"].len(), 1);
        assert_eq!(batch["attendance"].len(), 2);
    }

    #[test]
    fn clear_dirty_only_touches_accepted_rows() {
        let store = LocalStore::open_in_memory().unwrap();
        let accepted = store
            .upsert_local("employees", None, &serde_json::json!({"name": "Ada"}))
            .unwrap();
        let rejected = store
            .upsert_local("employees", None, &serde_json::json!({"name": "Grace"}))
            .unwrap();

        let cleared = store
            .clear_dirty("employees", &[(accepted.uuid.clone(), accepted.updated_at)])
            .unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(store.dirty_count().unwrap(), 1);
        assert!(store
            .record("employees", &rejected.uuid)
            .unwrap()
            .unwrap()
            .dirty);
    }

    #[test]
    fn apply_remote_is_idempotent() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let rows = vec![remote("a", "Ada", 10), remote("b", "Grace", 5)];

        let first = store.apply_remote("employees", &rows).unwrap();
        assert_eq!(first, TableApply { applied: 2, held: 0 });
        let snapshot = store.list_records("employees").unwrap();

        let second = store.apply_remote("employees", &rows).unwrap();
        assert_eq!(second, TableApply { applied: 2, held: 0 });
        assert_eq!(store.list_records("employees").unwrap(), snapshot);
        assert_eq!(store.dirty_count().unwrap(), 0);
    }

    #[test]
    fn apply_remote_never_dirties_rows() {
        let mut store = LocalStore::open_in_memory().unwrap();
        store
            .apply_remote("employees", &[remote("a", "Ada", 1)])
            .unwrap();
        let record = store.record("employees", "a").unwrap().unwrap();
        assert!(!record.dirty);
        assert_eq!(record.base_updated_at, Some(record.updated_at));
    }

    #[test]
    fn pull_holds_incoming_row_when_local_is_dirty() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let local = store
            .upsert_local("employees", None, &serde_json::json!({"name": "local edit"}))
            .unwrap();

        let stats = store
            .apply_remote("employees", &[remote(&local.uuid, "server copy", 0)])
            .unwrap();
        assert_eq!(stats, TableApply { applied: 0, held: 1 });
        assert_eq!(store.held_count().unwrap(), 1);

        // Local edit preserved, still dirty.
        let kept = store.record("employees", &local.uuid).unwrap().unwrap();
        assert!(kept.dirty);
        assert_eq!(kept.payload, serde_json::json!({"name": "local edit"}));

        // Conflict visible in the local log.
        let logs = store.local_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Conflict);
        assert_eq!(logs[0].record_uuid.as_deref(), Some(local.uuid.as_str()));
    }

    #[test]
    fn accepting_a_push_drops_the_held_copy() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let local = store
            .upsert_local("employees", None, &serde_json::json!({"name": "mine"}))
            .unwrap();
        store
            .apply_remote("employees", &[remote(&local.uuid, "theirs", 0)])
            .unwrap();
        assert_eq!(store.held_count().unwrap(), 1);

        store
            .clear_dirty("employees", &[(local.uuid.clone(), local.updated_at)])
            .unwrap();
        assert_eq!(store.held_count().unwrap(), 0);
        assert_eq!(store.dirty_count().unwrap(), 0);
    }

    #[test]
    fn clear_dirty_spares_edits_newer_than_the_push() {
        let store = LocalStore::open_in_memory().unwrap();
        let record = store
            .upsert_local("employees", None, &serde_json::json!({"v": 1}))
            .unwrap();
        let batch = store.pending_batch().unwrap();
        let pushed_at = batch["employees"][0].updated_at;

        // An edit lands while the batch is in flight. Bump the stamp so the
        // two writes are strictly ordered even within one millisecond.
        store
            .upsert_local("employees", Some(&record.uuid), &serde_json::json!({"v": 2}))
            .unwrap();
        store
            .conn
            .execute(
                "UPDATE records SET updated_at = ? WHERE uuid = ?",
                params![to_millis(pushed_at) + 1, record.uuid],
            )
            .unwrap();

        let cleared = store
            .clear_dirty("employees", &[(record.uuid.clone(), pushed_at)])
            .unwrap();
        assert_eq!(cleared, 0);
        assert_eq!(store.dirty_count().unwrap(), 1);
        // The in-flight edit is still queued for the next push.
        let pending = store.pending_batch().unwrap();
        assert_eq!(pending["employees"][0].payload, serde_json::json!({"v": 2}));
    }

    #[test]
    fn keep_local_rebases_onto_the_parked_version() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let local = store
            .upsert_local("employees", None, &serde_json::json!({"name": "local edit"}))
            .unwrap();
        let server_row = remote(&local.uuid, "server copy", 0);
        store
            .apply_remote("employees", std::slice::from_ref(&server_row))
            .unwrap();
        assert_eq!(store.held_count().unwrap(), 1);

        store
            .resolve_conflict("employees", &local.uuid, ConflictResolution::KeepLocal)
            .unwrap();

        let kept = store.record("employees", &local.uuid).unwrap().unwrap();
        assert!(kept.dirty);
        assert_eq!(kept.payload, serde_json::json!({"name": "local edit"}));
        assert_eq!(store.held_count().unwrap(), 0);
        // The next batch offers the edit from the version the server holds,
        // so the push can be accepted instead of rejected again.
        let batch = store.pending_batch().unwrap();
        assert_eq!(
            batch["employees"][0]
                .base_updated_at
                .map(|ts| ts.timestamp_millis()),
            Some(server_row.updated_at.timestamp_millis())
        );
    }

    #[test]
    fn take_server_adopts_the_parked_copy() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let local = store
            .upsert_local("employees", None, &serde_json::json!({"name": "mine"}))
            .unwrap();
        store
            .apply_remote("employees", &[remote(&local.uuid, "theirs", 0)])
            .unwrap();

        store
            .resolve_conflict("employees", &local.uuid, ConflictResolution::TakeServer)
            .unwrap();

        let adopted = store.record("employees", &local.uuid).unwrap().unwrap();
        assert!(!adopted.dirty);
        assert_eq!(adopted.payload, serde_json::json!({"name": "theirs"}));
        assert_eq!(store.dirty_count().unwrap(), 0);
        assert_eq!(store.held_count().unwrap(), 0);
        // Resolution is visible in the local log.
        let logs = store.local_logs(5).unwrap();
        assert!(logs[0].reason.as_deref().unwrap_or("").contains("adopted"));
    }

    #[test]
    fn resolve_requires_a_held_copy() {
        let mut store = LocalStore::open_in_memory().unwrap();
        let error = store
            .resolve_conflict("employees", "missing", ConflictResolution::KeepLocal)
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }
}
