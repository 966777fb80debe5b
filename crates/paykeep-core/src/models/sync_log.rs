//! Sync log entry model
//!
//! Append-only audit trail of reconciliation outcomes. The server owns the
//! canonical log; the client keeps a local mirror for pull-side conflicts so
//! a collision is visible from either actor's log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which half of the protocol produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogAction {
    Push,
    Pull,
    Reset,
}

impl LogAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::Pull => "PULL",
            Self::Reset => "RESET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PUSH" => Some(Self::Push),
            "PULL" => Some(Self::Pull),
            "RESET" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Outcome recorded for a reconciled record or batch-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Success,
    Conflict,
    Error,
}

impl LogStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Conflict => "CONFLICT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(Self::Success),
            "CONFLICT" => Some(Self::Conflict),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One durable line in the sync audit log. Never mutated after write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub action: LogAction,
    pub status: LogStatus,
    /// Table involved; `None` for batch-level entries.
    pub table_name: Option<String>,
    /// Record involved; `None` for batch-level entries.
    pub record_uuid: Option<String>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncLogEntry {
    /// A per-record conflict entry with a human-readable reason.
    pub fn conflict(
        action: LogAction,
        table_name: impl Into<String>,
        record_uuid: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            status: LogStatus::Conflict,
            table_name: Some(table_name.into()),
            record_uuid: Some(record_uuid.into()),
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    /// A per-record success entry.
    pub fn success(
        action: LogAction,
        table_name: impl Into<String>,
        record_uuid: impl Into<String>,
    ) -> Self {
        Self {
            action,
            status: LogStatus::Success,
            table_name: Some(table_name.into()),
            record_uuid: Some(record_uuid.into()),
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// A batch-level error entry (no single record to point at).
    pub fn batch_error(
        action: LogAction,
        table_name: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            status: LogStatus::Error,
            table_name,
            record_uuid: None,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}
