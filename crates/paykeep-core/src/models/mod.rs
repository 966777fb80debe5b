//! Shared domain models

mod record;
mod sync_log;

pub use record::{HeldRecord, LocalRecord, RecordId};
pub use sync_log::{LogAction, LogStatus, SyncLogEntry};
