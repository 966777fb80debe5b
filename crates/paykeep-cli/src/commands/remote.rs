use std::path::Path;

use paykeep_core::SyncTransport;

use crate::commands::common::{connect, format_log_lines, open_store};
use crate::error::CliError;

pub async fn run_status(
    server: Option<&str>,
    token: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let transport = connect(server, token)?;
    let status = transport.status().await?;

    println!("server mode: {}", status.mode.as_str());
    println!(
        "server last sync: {}",
        status
            .last_sync_time
            .map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339())
    );
    println!(
        "local watermark: {}",
        store
            .watermark()?
            .map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339())
    );
    println!("pending changes: {}", store.dirty_count()?);
    Ok(())
}

pub async fn run_logs(
    server: Option<&str>,
    token: Option<&str>,
    limit: usize,
    local: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let entries = if local {
        open_store(db_path)?.local_logs(limit)?
    } else {
        connect(server, token)?.fetch_logs(limit).await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No log entries.");
        return Ok(());
    }
    for line in format_log_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_reset(server: Option<&str>, token: Option<&str>) -> Result<(), CliError> {
    let transport = connect(server, token)?;
    transport.emergency_reset().await?;
    println!("Server sync mode reset to ONLINE.");
    Ok(())
}
