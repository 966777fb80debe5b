use std::collections::BTreeMap;
use std::path::Path;

use paykeep_core::ConflictResolution;
use serde::Serialize;

use crate::cli::ResolveStrategy;
use crate::commands::common::{
    format_held_lines, format_record_lines, open_store, record_to_item, RecordListItem,
};
use crate::error::CliError;

pub fn run_put(
    table: &str,
    payload: &str,
    uuid: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    if !payload.is_object() {
        return Err(CliError::PayloadNotObject);
    }

    let store = open_store(db_path)?;
    let record = store.upsert_local(table, uuid, &payload)?;
    println!("{}", record.uuid);
    Ok(())
}

pub fn run_list(table: &str, limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let mut records = store.list_records(table)?;
    records.truncate(limit);

    if as_json {
        let items = records
            .iter()
            .map(record_to_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PendingSummary {
    tables: BTreeMap<String, usize>,
    total: usize,
    held_conflicts: usize,
}

pub fn run_pending(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let batch = store.pending_batch()?;

    let tables: BTreeMap<String, usize> = batch
        .iter()
        .map(|(table, rows)| (table.clone(), rows.len()))
        .collect();
    let summary = PendingSummary {
        total: tables.values().sum(),
        held_conflicts: store.held_count()?,
        tables,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.total == 0 {
        println!("Nothing to sync.");
    } else {
        for (table, count) in &summary.tables {
            println!("{table}: {count}");
        }
        println!("total: {}", summary.total);
    }
    if summary.held_conflicts > 0 {
        println!("held conflicts: {}", summary.held_conflicts);
    }
    Ok(())
}

pub fn run_conflicts(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let held = store.held_records()?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&held)?);
        return Ok(());
    }

    if held.is_empty() {
        println!("No held conflicts.");
        return Ok(());
    }
    for line in format_held_lines(&held) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_resolve(
    table: &str,
    uuid: &str,
    strategy: ResolveStrategy,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut store = open_store(db_path)?;
    let resolution = match strategy {
        ResolveStrategy::KeepLocal => ConflictResolution::KeepLocal,
        ResolveStrategy::TakeServer => ConflictResolution::TakeServer,
    };
    store.resolve_conflict(table, uuid, resolution)?;

    match resolution {
        ConflictResolution::KeepLocal => {
            println!("Kept local edit; it will be offered on the next sync.");
        }
        ConflictResolution::TakeServer => println!("Adopted server copy."),
    }
    Ok(())
}
