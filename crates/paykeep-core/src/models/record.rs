//! Syncable record model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A globally-unique record identifier, using UUID v7 (time-sortable).
///
/// Stable across devices regardless of local primary keys; this is the key
/// the reconciliation service merges on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Mint a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A row of a whitelisted table as held in the local store.
///
/// `dirty` is local-only bookkeeping and never crosses the wire;
/// `base_updated_at` is the server version the current content was edited
/// from (`None` until the server has seen the row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub table_name: String,
    pub uuid: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub base_updated_at: Option<DateTime<Utc>>,
    pub dirty: bool,
}

/// A server row parked during pull because the local copy had unpushed
/// edits. Consumed by an explicit resolution, never applied in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldRecord {
    pub table_name: String,
    pub uuid: String,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub held_at: DateTime<Utc>,
}
