//! paykeep-core - Core library for Paykeep
//!
//! This crate contains the offline-first sync engine shared by all Paykeep
//! clients: the local store and outbox, the wire contracts for the `/sync`
//! API, the HTTP transport, the sync orchestrator, and the status poller.
//! Business calculations and UI surfaces live elsewhere; they consume sync
//! purely through these types.

pub mod error;
pub mod models;
pub mod poller;
pub mod store;
pub mod sync;
pub mod tables;
pub mod transport;
pub mod wire;

pub use error::{Error, Result};
pub use store::{ConflictResolution, LocalStore};
pub use sync::{CycleOutcome, SyncProgress, SyncStage, Syncer};
pub use transport::{HttpTransport, SyncTransport};
