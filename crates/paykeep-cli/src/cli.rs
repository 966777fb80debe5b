use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "paykeep")]
#[command(about = "Offline-first payroll data with server sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync server URL (or PAYKEEP_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Bearer token for the sync API (or PAYKEEP_API_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update a record in a syncable table
    Put {
        /// Target table (employees, attendance, pay_records, settings)
        table: String,
        /// Record payload as a JSON object
        payload: String,
        /// Existing record UUID (a new one is minted when omitted)
        #[arg(long, value_name = "UUID")]
        uuid: Option<String>,
    },
    /// List local records in a table
    List {
        /// Table to list
        table: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show unsynced local changes
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pulled server rows parked behind local edits
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a parked conflict for one record
    Resolve {
        /// Table holding the conflicted record
        table: String,
        /// Record UUID
        uuid: String,
        /// Which side wins
        #[arg(value_enum)]
        strategy: ResolveStrategy,
    },
    /// Run one sync cycle against the server
    Sync,
    /// Show server mode and local watermark
    Status,
    /// Show the sync log
    Logs {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Read the local conflict log instead of the server log
        #[arg(long)]
        local: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Force the server sync mode back to ONLINE
    Reset,
    /// Poll status continuously and auto-sync (Ctrl-C to stop)
    Watch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolveStrategy {
    /// Keep the local edit, rebased so the next push can win
    KeepLocal,
    /// Adopt the server copy and discard the local edit
    TakeServer,
}
