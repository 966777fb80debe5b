//! Wire contracts for the `/sync` HTTP API.
//!
//! These serde types are shared verbatim by the client transport and the
//! server routes, so the two sides cannot drift apart. All payloads are JSON
//! with camelCase keys; timestamps are RFC 3339 UTC.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SyncLogEntry;

/// Authoritative sync mode reported by the server and mirrored by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMode {
    Online,
    Offline,
    Syncing,
}

impl SyncMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Syncing => "SYNCING",
        }
    }

    /// Parse the canonical uppercase form (used for SQLite round-trips).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ONLINE" => Some(Self::Online),
            "OFFLINE" => Some(Self::Offline),
            "SYNCING" => Some(Self::Syncing),
            _ => None,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A locally edited row offered to the server.
///
/// `base_updated_at` is the server-stamped version this edit started from;
/// `None` means the row was created locally and the server has never seen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRow {
    pub uuid: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_updated_at: Option<DateTime<Utc>>,
}

/// `POST /sync/push` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub device_id: String,
    pub tables: BTreeMap<String, Vec<PushRow>>,
}

/// A single row the server refused, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRow {
    pub uuid: String,
    pub reason: String,
}

/// `POST /sync/push` response body.
///
/// Acceptance is per record: a rejected row never fails the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub success: bool,
    #[serde(default)]
    pub accepted: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub rejected: BTreeMap<String, Vec<RejectedRow>>,
}

/// A canonical server row delivered by a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRow {
    pub uuid: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// `GET /sync/pull` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub success: bool,
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<RemoteRow>>,
    pub last_sync_time: DateTime<Utc>,
}

/// `GET /sync/status` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub mode: SyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// `POST /sync/status` request body (watermark acknowledgment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub last_sync_time: DateTime<Utc>,
}

/// Bare success envelope (`POST /sync/status`, `POST /sync/reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub success: bool,
}

/// `GET /sync/logs` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<SyncLogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sync_mode_wire_form_is_uppercase() {
        assert_eq!(
            serde_json::to_string(&SyncMode::Offline).unwrap(),
            "\"OFFLINE\""
        );
        assert_eq!(SyncMode::parse("SYNCING"), Some(SyncMode::Syncing));
        assert_eq!(SyncMode::parse("syncing"), None);
    }

    #[test]
    fn push_request_uses_camel_case_keys() {
        let request = PushRequest {
            device_id: "device-1".to_string(),
            tables: BTreeMap::from([(
                "employees".to_string(),
                vec![PushRow {
                    uuid: "u1".to_string(),
                    payload: serde_json::json!({"name": "Ada"}),
                    updated_at: DateTime::UNIX_EPOCH,
                    base_updated_at: None,
                }],
            )]),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"deviceId\""));
        assert!(json.contains("\"updatedAt\""));
        assert!(!json.contains("baseUpdatedAt"), "absent base must be omitted");
    }

    #[test]
    fn pull_response_defaults_missing_tables() {
        let json = r#"{"success":true,"lastSyncTime":"2026-01-05T09:30:00Z"}"#;
        let response: PullResponse = serde_json::from_str(json).unwrap();
        assert!(response.success);
        assert!(response.tables.is_empty());
    }
}
