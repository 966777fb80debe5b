use std::env;
use std::path::Path;

use paykeep_core::models::{HeldRecord, LocalRecord, SyncLogEntry};
use paykeep_core::{HttpTransport, LocalStore};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub uuid: String,
    pub updated_at: String,
    pub dirty: bool,
    pub payload: serde_json::Value,
}

pub fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::debug!("opening local store at {}", db_path.display());
    Ok(LocalStore::open(db_path)?)
}

/// Build the HTTP transport from flags, falling back to the environment.
pub fn connect(server: Option<&str>, token: Option<&str>) -> Result<HttpTransport, CliError> {
    let server = match server {
        Some(value) => value.to_string(),
        None => env::var("PAYKEEP_SERVER_URL").map_err(|_| CliError::MissingServer)?,
    };
    let token = match token {
        Some(value) => value.to_string(),
        None => env::var("PAYKEEP_API_TOKEN").map_err(|_| CliError::MissingToken)?,
    };
    Ok(HttpTransport::new(server, token)?)
}

pub fn record_to_item(record: &LocalRecord) -> RecordListItem {
    RecordListItem {
        uuid: record.uuid.clone(),
        updated_at: record.updated_at.to_rfc3339(),
        dirty: record.dirty,
        payload: record.payload.clone(),
    }
}

pub fn format_record_lines(records: &[LocalRecord]) -> Vec<String> {
    records
        .iter()
        .map(|record| {
            let marker = if record.dirty { "*" } else { " " };
            format!(
                "{marker} {}  {}  {}",
                record.uuid,
                record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                payload_preview(&record.payload),
            )
        })
        .collect()
}

pub fn format_held_lines(held: &[HeldRecord]) -> Vec<String> {
    held.iter()
        .map(|record| {
            format!(
                "{}/{}  server {}  held {}  {}",
                record.table_name,
                record.uuid,
                record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                record.held_at.format("%Y-%m-%d %H:%M:%S"),
                payload_preview(&record.payload),
            )
        })
        .collect()
}

pub fn format_log_lines(entries: &[SyncLogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let scope = match (&entry.table_name, &entry.record_uuid) {
                (Some(table), Some(uuid)) => format!("{table}/{uuid}"),
                (Some(table), None) => table.clone(),
                _ => "-".to_string(),
            };
            let reason = entry.reason.as_deref().unwrap_or("");
            format!(
                "{}  {:<5} {:<8} {scope}  {reason}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.action.as_str(),
                entry.status.as_str(),
            )
        })
        .collect()
}

fn payload_preview(payload: &serde_json::Value) -> String {
    const MAX_PREVIEW: usize = 60;
    let rendered = payload.to_string();
    if rendered.chars().count() > MAX_PREVIEW {
        let truncated: String = rendered.chars().take(MAX_PREVIEW).collect();
        format!("{truncated}...")
    } else {
        rendered
    }
}
