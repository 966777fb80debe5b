use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] paykeep_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record payload must be a JSON object")]
    PayloadNotObject,
    #[error("No sync server configured; pass --server or set PAYKEEP_SERVER_URL")]
    MissingServer,
    #[error("No API token configured; pass --token or set PAYKEEP_API_TOKEN")]
    MissingToken,
}
