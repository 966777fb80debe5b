//! Device identity and watermark persistence

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{from_millis, to_millis, LocalStore};
use crate::error::Result;
use crate::models::RecordId;

const KEY_DEVICE_ID: &str = "device_id";
const KEY_WATERMARK: &str = "last_successful_sync";

impl LocalStore {
    /// The stable identifier for this installation.
    ///
    /// Generated once on first call and persisted; never changes afterwards.
    pub fn device_id(&self) -> Result<String> {
        if let Some(existing) = self.meta_get(KEY_DEVICE_ID)? {
            return Ok(existing);
        }

        let generated = RecordId::new().as_str();
        self.meta_set(KEY_DEVICE_ID, &generated)?;
        tracing::info!(device_id = %generated, "generated device identity");
        Ok(generated)
    }

    /// Timestamp of the last fully-acknowledged sync, if any.
    pub fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let raw = self.meta_get(KEY_WATERMARK)?;
        Ok(raw
            .and_then(|value| value.parse::<i64>().ok())
            .map(from_millis))
    }

    /// Advance the watermark. Monotonic: a value at or before the current
    /// watermark is ignored (regression only costs a re-pull, never data).
    pub fn advance_watermark(&self, timestamp: DateTime<Utc>) -> Result<()> {
        if let Some(current) = self.watermark()? {
            if timestamp <= current {
                tracing::debug!(
                    proposed = %timestamp,
                    current = %current,
                    "ignoring non-advancing watermark"
                );
                return Ok(());
            }
        }
        self.meta_set(KEY_WATERMARK, &to_millis(timestamp).to_string())
    }

    fn meta_get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
