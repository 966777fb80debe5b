//! Paykeep CLI - manage local payroll records and sync them with the server.

mod cli;
mod commands;
mod error;

use std::path::PathBuf;

use clap::Parser;

use cli::{Cli, Commands};
use commands::local::{run_conflicts, run_list, run_pending, run_put, run_resolve};
use commands::remote::{run_logs, run_reset, run_status};
use commands::sync::{run_sync, run_watch};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paykeep=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let server = cli.server.as_deref();
    let token = cli.token.as_deref();

    match cli.command {
        Commands::Put {
            table,
            payload,
            uuid,
        } => run_put(&table, &payload, uuid.as_deref(), &db_path)?,
        Commands::List { table, limit, json } => run_list(&table, limit, json, &db_path)?,
        Commands::Pending { json } => run_pending(json, &db_path)?,
        Commands::Conflicts { json } => run_conflicts(json, &db_path)?,
        Commands::Resolve {
            table,
            uuid,
            strategy,
        } => run_resolve(&table, &uuid, strategy, &db_path)?,
        Commands::Sync => run_sync(server, token, &db_path).await?,
        Commands::Status => run_status(server, token, &db_path).await?,
        Commands::Logs { limit, local, json } => {
            run_logs(server, token, limit, local, json, &db_path).await?;
        }
        Commands::Reset => run_reset(server, token).await?,
        Commands::Watch => run_watch(server, token, &db_path).await?,
    }

    Ok(())
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os("PAYKEEP_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("paykeep")
        .join("paykeep.db")
}
