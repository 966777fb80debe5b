//! Sync orchestrator
//!
//! Runs one cycle (verify, push, pull, finalize) against the reconciliation
//! service with weighted progress reporting and exponential-backoff retries.
//! At most one cycle is in flight per device; the poller and any manual
//! trigger share the same [`SharedSyncState`] guard, so a second invocation
//! reports [`CycleOutcome::AlreadyInProgress`] instead of racing.

mod progress;

pub use progress::{SyncProgress, SyncStage};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::store::LocalStore;
use crate::tables::is_syncable;
use crate::transport::SyncTransport;
use crate::wire::{PushRequest, SyncMode};
use progress::{FINALIZING, PULLING, PUSHING, VERIFYING};

/// Retry budget for one cycle. A failed attempt restarts the whole
/// push+pull sequence; partial progress is discarded because the watermark
/// has not advanced yet.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given 1-based attempt: `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// The single piece of mutable state shared between the orchestrator and
/// the status poller: the in-flight flag plus the last known sync mode.
pub struct SharedSyncState {
    in_flight: AtomicBool,
    mode: Mutex<SyncMode>,
}

impl Default for SharedSyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedSyncState {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            mode: Mutex::new(SyncMode::Online),
        }
    }

    /// Claim the in-flight flag. `None` means a cycle is already running.
    /// The returned guard clears the flag on drop, on every exit path.
    pub fn try_begin_cycle(self: &Arc<Self>) -> Option<CycleGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| CycleGuard {
                state: Arc::clone(self),
            })
    }

    pub fn cycle_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> SyncMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: SyncMode) {
        *lock(&self.mode) = mode;
    }

    /// Mode as the UI should see it: a local in-flight cycle reports
    /// SYNCING even before the server confirms it.
    pub fn effective_mode(&self) -> SyncMode {
        if self.cycle_in_flight() {
            SyncMode::Syncing
        } else {
            self.mode()
        }
    }
}

/// RAII claim on the in-flight flag.
pub struct CycleGuard {
    state: Arc<SharedSyncState>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

/// What the push pipeline accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub pushed: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// What the pull pipeline accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullSummary {
    pub tables: usize,
    pub applied: usize,
    pub held: usize,
    pub last_sync_time: DateTime<Utc>,
}

/// Result of one orchestrator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { push: PushSummary, pull: PullSummary },
    AlreadyInProgress,
}

/// The mutex-guarded sync coordinator. One long-lived instance per process,
/// constructed at startup and shared (via `Clone`) with the poller.
pub struct Syncer<T> {
    store: Arc<Mutex<LocalStore>>,
    transport: Arc<T>,
    shared: Arc<SharedSyncState>,
    retry: RetryPolicy,
}

impl<T> Clone for Syncer<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            retry: self.retry,
        }
    }
}

impl<T: SyncTransport> Syncer<T> {
    pub fn new(store: LocalStore, transport: T) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            transport: Arc::new(transport),
            shared: Arc::new(SharedSyncState::new()),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Access the local store (the CLI edits records through this).
    pub fn store(&self) -> MutexGuard<'_, LocalStore> {
        lock(&self.store)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn shared_state(&self) -> &Arc<SharedSyncState> {
        &self.shared
    }

    /// Rows currently awaiting push.
    pub fn pending_changes(&self) -> Result<usize> {
        self.store().dirty_count()
    }

    /// Run one sync cycle, reporting weighted progress through the callback.
    ///
    /// Refuses to start while another cycle is in flight. Retries the whole
    /// push+pull sequence on error, then surfaces
    /// [`Error::ExhaustedRetries`] once the budget is spent.
    pub async fn run_cycle<F>(&self, mut on_progress: F) -> Result<CycleOutcome>
    where
        F: FnMut(SyncProgress),
    {
        let Some(_guard) = self.shared.try_begin_cycle() else {
            tracing::debug!("sync cycle already in progress; skipping");
            return Ok(CycleOutcome::AlreadyInProgress);
        };

        let device_id = self.store().device_id()?;
        let watermark = self.store().watermark()?;
        tracing::info!(device_id = %device_id, ?watermark, "starting sync cycle");
        emit(&mut on_progress, SyncStage::Verifying, 1, 1, VERIFYING.at(1, 1));

        let mut attempt = 1;
        loop {
            match self.attempt_once(&device_id, &mut on_progress).await {
                Ok((push, pull)) => {
                    self.finalize(pull.last_sync_time, &mut on_progress).await?;
                    tracing::info!(
                        attempt,
                        accepted = push.accepted,
                        rejected = push.rejected,
                        applied = pull.applied,
                        held = pull.held,
                        "sync cycle completed"
                    );
                    return Ok(CycleOutcome::Completed { push, pull });
                }
                Err(error) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        %error,
                        "sync attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    if attempt >= self.retry.max_attempts {
                        emit(&mut on_progress, SyncStage::Failed, 0, 1, 0);
                        return Err(Error::ExhaustedRetries {
                            attempts: attempt,
                            last: error.to_string(),
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One full push-then-pull pass. Push always completes before pull so a
    /// device's own edits are offered before it accepts the server's view.
    async fn attempt_once<F>(
        &self,
        device_id: &str,
        on_progress: &mut F,
    ) -> Result<(PushSummary, PullSummary)>
    where
        F: FnMut(SyncProgress),
    {
        let push = self.push_local_changes(device_id, on_progress).await?;
        let pull = self.pull_server_changes(device_id, on_progress).await?;
        Ok((push, pull))
    }

    async fn push_local_changes<F>(&self, device_id: &str, on_progress: &mut F) -> Result<PushSummary>
    where
        F: FnMut(SyncProgress),
    {
        let batch = self.store().pending_batch()?;
        let pushed = batch.values().map(Vec::len).sum();
        let total = batch.len().max(1);
        emit(on_progress, SyncStage::Pushing, 0, total, PUSHING.at(0, total));

        let request = PushRequest {
            device_id: device_id.to_string(),
            tables: batch,
        };
        let response = self.transport.push(&request).await?;
        if !response.success {
            return Err(Error::Validation("server rejected push batch".to_string()));
        }

        let mut summary = PushSummary {
            pushed,
            ..PushSummary::default()
        };
        let mut done = 0;
        for (table, uuids) in &response.accepted {
            // Clear flags as of the gathered timestamps; an edit that landed
            // while the batch was in flight stays dirty for the next push.
            let confirmed: Vec<(String, DateTime<Utc>)> = request
                .tables
                .get(table)
                .into_iter()
                .flatten()
                .filter(|row| uuids.contains(&row.uuid))
                .map(|row| (row.uuid.clone(), row.updated_at))
                .collect();
            self.store().clear_dirty(table, &confirmed)?;
            summary.accepted += uuids.len();
            done += 1;
            emit(on_progress, SyncStage::Pushing, done, total, PUSHING.at(done, total));
        }
        for (table, rejects) in &response.rejected {
            for reject in rejects {
                tracing::warn!(
                    table,
                    uuid = %reject.uuid,
                    reason = %reject.reason,
                    "push rejected for record; row stays dirty"
                );
            }
            summary.rejected += rejects.len();
        }
        // No-op batches (and fully-rejected ones) still complete the window.
        emit(on_progress, SyncStage::Pushing, total, total, PUSHING.at(total, total));
        Ok(summary)
    }

    async fn pull_server_changes<F>(&self, device_id: &str, on_progress: &mut F) -> Result<PullSummary>
    where
        F: FnMut(SyncProgress),
    {
        let since = self.store().watermark()?;
        let response = self.transport.pull(device_id, since).await?;
        if !response.success {
            return Err(Error::Validation("server rejected pull request".to_string()));
        }

        let total = response.tables.len().max(1);
        emit(on_progress, SyncStage::Pulling, 0, total, PULLING.at(0, total));

        let mut summary = PullSummary {
            tables: response.tables.len(),
            applied: 0,
            held: 0,
            last_sync_time: response.last_sync_time,
        };
        let mut done = 0;
        for (table, rows) in &response.tables {
            if !is_syncable(table) {
                tracing::warn!(table, "ignoring pulled delta for non-whitelisted table");
            } else {
                let stats = self.store().apply_remote(table, rows)?;
                summary.applied += stats.applied;
                summary.held += stats.held;
            }
            done += 1;
            emit(on_progress, SyncStage::Pulling, done, total, PULLING.at(done, total));
        }
        emit(on_progress, SyncStage::Pulling, total, total, PULLING.at(total, total));
        Ok(summary)
    }

    /// Persist the new watermark, then tell the server we adopted it.
    ///
    /// A failed acknowledgment does not roll the watermark back: pull is
    /// idempotent, so re-delivering already-applied rows is safe.
    async fn finalize<F>(&self, server_time: DateTime<Utc>, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(SyncProgress),
    {
        emit(on_progress, SyncStage::Finalizing, 0, 1, FINALIZING.at(0, 1));
        self.store().advance_watermark(server_time)?;
        if let Err(error) = self.transport.acknowledge(server_time).await {
            tracing::warn!(%error, "watermark acknowledgment failed; will retry next cycle");
        }
        emit(on_progress, SyncStage::Completed, 1, 1, FINALIZING.at(1, 1));
        Ok(())
    }
}

fn emit<F: FnMut(SyncProgress)>(
    on_progress: &mut F,
    stage: SyncStage,
    current: usize,
    total: usize,
    percent: u8,
) {
    on_progress(SyncProgress {
        stage,
        current,
        total,
        percent,
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
