use std::path::Path;

use paykeep_core::poller::StatusPoller;
use paykeep_core::{CycleOutcome, SyncProgress, Syncer};

use crate::commands::common::{connect, open_store};
use crate::error::CliError;

pub async fn run_sync(
    server: Option<&str>,
    token: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let transport = connect(server, token)?;
    let syncer = Syncer::new(store, transport);

    let outcome = syncer.run_cycle(print_progress).await?;
    match outcome {
        CycleOutcome::Completed { push, pull } => {
            println!(
                "Pushed {} ({} accepted, {} rejected); pulled {} rows across {} tables ({} held as conflicts)",
                push.pushed, push.accepted, push.rejected, pull.applied, pull.tables, pull.held
            );
            if push.rejected > 0 || pull.held > 0 {
                println!("Run `paykeep logs` to inspect conflicts.");
            }
        }
        CycleOutcome::AlreadyInProgress => println!("A sync cycle is already running."),
    }
    Ok(())
}

pub async fn run_watch(
    server: Option<&str>,
    token: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let transport = connect(server, token)?;
    let syncer = Syncer::new(store, transport);

    let (poller, handle) = StatusPoller::new(syncer);
    let mut snapshots = handle.snapshots();
    let task = tokio::spawn(poller.run());

    println!("Watching sync status (Ctrl-C to stop)...");
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                handle.stop();
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *snapshots.borrow_and_update();
                let last = snapshot
                    .last_sync_time
                    .map_or_else(|| "never".to_string(), |ts| ts.to_rfc3339());
                println!(
                    "{}  pending: {}  last sync: {last}",
                    snapshot.mode.as_str(),
                    snapshot.pending_changes,
                );
            }
        }
    }

    let _ = task.await;
    println!("Stopped.");
    Ok(())
}

fn print_progress(progress: SyncProgress) {
    println!("[{:>3}%] {}", progress.percent, progress.stage);
}
