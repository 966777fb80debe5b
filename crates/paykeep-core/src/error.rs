//! Error types for paykeep-core

use thiserror::Error;

/// Result type alias using paykeep-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in paykeep-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Request never reached the server (offline, DNS, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// The server responded with an error payload
    #[error("Server error: {0}")]
    Api(String),

    /// The server rejected the batch as malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Terminal failure after the retry budget is spent
    #[error("Sync failed after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: String },

    /// Local database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Table is not on the sync allow-list
    #[error("Table is not syncable: {0}")]
    TableNotSyncable(String),
}

impl Error {
    /// Whether this error means the server was unreachable.
    ///
    /// The poller flips the mode to OFFLINE on these; server-side rejections
    /// (`Api`, `Validation`) do not imply connectivity loss.
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Validation(format!("invalid server payload: {error}"))
        } else {
            Self::Network(error.to_string())
        }
    }
}
