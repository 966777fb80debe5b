//! Status poller
//!
//! A self-rescheduling task that asks the server for the authoritative sync
//! mode, publishes `{mode, pending, last sync}` snapshots for the UI layer,
//! and triggers automatic sync cycles. Each poll sleeps *after* completing,
//! so slow responses can never overlap; the stop channel makes teardown
//! deterministic instead of leaking a timer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::sync::Syncer;
use crate::transport::SyncTransport;
use crate::wire::SyncMode;

/// Background cadence for automatic sync while online.
const AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(600);

/// Poll intervals per mode. Syncing polls fast to show live progress,
/// offline probes for recovery, online idles.
#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub online: Duration,
    pub offline: Duration,
    pub syncing: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            online: Duration::from_secs(30),
            offline: Duration::from_secs(10),
            syncing: Duration::from_secs(3),
        }
    }
}

impl PollIntervals {
    pub const fn for_mode(&self, mode: SyncMode) -> Duration {
        match mode {
            SyncMode::Online => self.online,
            SyncMode::Offline => self.offline,
            SyncMode::Syncing => self.syncing,
        }
    }
}

/// What the poller last observed, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSnapshot {
    pub mode: SyncMode,
    pub pending_changes: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl Default for PollSnapshot {
    fn default() -> Self {
        Self {
            mode: SyncMode::Online,
            pending_changes: 0,
            last_sync_time: None,
        }
    }
}

/// Handle for observing and stopping a running poller.
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    snapshots: watch::Receiver<PollSnapshot>,
}

impl PollerHandle {
    /// Ask the poller to exit after its current iteration.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Subscribe to snapshot updates.
    pub fn snapshots(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshots.clone()
    }

    /// The most recent snapshot.
    pub fn snapshot(&self) -> PollSnapshot {
        *self.snapshots.borrow()
    }
}

/// The scheduled status task. Owns a clone of the [`Syncer`] so automatic
/// triggers share the same in-flight guard as manual ones.
pub struct StatusPoller<T> {
    syncer: Syncer<T>,
    intervals: PollIntervals,
    auto_sync_interval: Duration,
    next_auto_sync: tokio::time::Instant,
    stop: watch::Receiver<bool>,
    updates: watch::Sender<PollSnapshot>,
}

impl<T: SyncTransport> StatusPoller<T> {
    pub fn new(syncer: Syncer<T>) -> (Self, PollerHandle) {
        Self::with_intervals(syncer, PollIntervals::default(), AUTO_SYNC_INTERVAL)
    }

    pub fn with_intervals(
        syncer: Syncer<T>,
        intervals: PollIntervals,
        auto_sync_interval: Duration,
    ) -> (Self, PollerHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (update_tx, update_rx) = watch::channel(PollSnapshot::default());
        let poller = Self {
            syncer,
            intervals,
            auto_sync_interval,
            next_auto_sync: tokio::time::Instant::now() + auto_sync_interval,
            stop: stop_rx,
            updates: update_tx,
        };
        let handle = PollerHandle {
            stop: stop_tx,
            snapshots: update_rx,
        };
        (poller, handle)
    }

    /// Poll until stopped. Consumes the poller; spawn it on the runtime and
    /// keep the [`PollerHandle`] for teardown.
    pub async fn run(mut self) {
        loop {
            if *self.stop.borrow() {
                break;
            }
            let mode = self.poll_once().await;
            let interval = self.intervals.for_mode(mode);
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("status poller stopped");
    }

    /// One poll: observe the server mode, publish a snapshot, and trigger an
    /// automatic sync when connectivity returns or the cadence is due.
    async fn poll_once(&mut self) -> SyncMode {
        let previous = self.syncer.shared_state().mode();
        let mut last_sync_time = None;

        let observed = match self.syncer.transport().status().await {
            Ok(status) => {
                last_sync_time = status.last_sync_time;
                status.mode
            }
            Err(error) if error.is_network() => {
                tracing::debug!(%error, "status poll could not reach server");
                SyncMode::Offline
            }
            Err(error) => {
                // Server answered but refused us; connectivity is intact,
                // keep the previous belief.
                tracing::warn!(%error, "status poll failed");
                previous
            }
        };
        self.syncer.shared_state().set_mode(observed);

        let pending_changes = self.syncer.pending_changes().unwrap_or_else(|error| {
            tracing::warn!(%error, "could not count pending changes");
            0
        });
        let mode = self.syncer.shared_state().effective_mode();
        let _ = self.updates.send(PollSnapshot {
            mode,
            pending_changes,
            last_sync_time,
        });

        let regained = previous == SyncMode::Offline && observed == SyncMode::Online;
        let cadence_due = tokio::time::Instant::now() >= self.next_auto_sync;
        if observed == SyncMode::Online && (regained || cadence_due) {
            self.next_auto_sync = tokio::time::Instant::now() + self.auto_sync_interval;
            if regained {
                tracing::info!("connectivity regained; triggering automatic sync");
            }
            // Debounced by the shared in-flight guard.
            match self.syncer.run_cycle(|_| {}).await {
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "automatic sync cycle failed"),
            }
        }

        mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::store::LocalStore;
    use crate::wire::{
        PullResponse, PushRequest, PushResponse, SimpleResponse, StatusResponse,
    };
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockTransport {
        network_down: AtomicBool,
        reported_mode: SyncMode,
        status_calls: AtomicUsize,
        push_calls: AtomicUsize,
    }

    impl MockTransport {
        fn up(mode: SyncMode) -> Self {
            Self {
                network_down: AtomicBool::new(false),
                reported_mode: mode,
                status_calls: AtomicUsize::new(0),
                push_calls: AtomicUsize::new(0),
            }
        }

        fn down() -> Self {
            let transport = Self::up(SyncMode::Online);
            transport.network_down.store(true, Ordering::SeqCst);
            transport
        }
    }

    impl SyncTransport for MockTransport {
        fn push(&self, _request: &PushRequest) -> impl Future<Output = Result<PushResponse>> + Send {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
            let down = self.network_down.load(Ordering::SeqCst);
            async move {
                if down {
                    Err(Error::Network("connection refused".to_string()))
                } else {
                    Ok(PushResponse {
                        success: true,
                        ..PushResponse::default()
                    })
                }
            }
        }

        fn pull(
            &self,
            _device_id: &str,
            _since: Option<DateTime<Utc>>,
        ) -> impl Future<Output = Result<PullResponse>> + Send {
            let down = self.network_down.load(Ordering::SeqCst);
            async move {
                if down {
                    Err(Error::Network("connection refused".to_string()))
                } else {
                    Ok(PullResponse {
                        success: true,
                        tables: BTreeMap::new(),
                        last_sync_time: Utc::now(),
                    })
                }
            }
        }

        fn status(&self) -> impl Future<Output = Result<StatusResponse>> + Send {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let down = self.network_down.load(Ordering::SeqCst);
            let mode = self.reported_mode;
            async move {
                if down {
                    Err(Error::Network("connection refused".to_string()))
                } else {
                    Ok(StatusResponse {
                        success: true,
                        mode,
                        last_sync_time: None,
                    })
                }
            }
        }

        fn acknowledge(
            &self,
            _last_sync_time: DateTime<Utc>,
        ) -> impl Future<Output = Result<SimpleResponse>> + Send {
            async move { Ok(SimpleResponse { success: true }) }
        }
    }

    fn poller_with(transport: MockTransport) -> (StatusPoller<MockTransport>, PollerHandle) {
        let syncer = Syncer::new(LocalStore::open_in_memory().unwrap(), transport);
        StatusPoller::new(syncer)
    }

    #[test]
    fn intervals_adapt_to_mode() {
        let intervals = PollIntervals::default();
        assert_eq!(intervals.for_mode(SyncMode::Syncing), Duration::from_secs(3));
        assert_eq!(intervals.for_mode(SyncMode::Offline), Duration::from_secs(10));
        assert_eq!(intervals.for_mode(SyncMode::Online), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn network_failure_forces_offline() {
        let (mut poller, handle) = poller_with(MockTransport::down());
        let mode = poller.poll_once().await;
        assert_eq!(mode, SyncMode::Offline);
        assert_eq!(handle.snapshot().mode, SyncMode::Offline);
    }

    #[tokio::test]
    async fn server_mode_is_authoritative() {
        let (mut poller, handle) = poller_with(MockTransport::up(SyncMode::Syncing));
        let mode = poller.poll_once().await;
        assert_eq!(mode, SyncMode::Syncing);
        assert_eq!(handle.snapshot().mode, SyncMode::Syncing);
    }

    #[tokio::test]
    async fn snapshot_reports_pending_changes() {
        let (mut poller, handle) = poller_with(MockTransport::up(SyncMode::Offline));
        poller
            .syncer
            .store()
            .upsert_local("employees", None, &serde_json::json!({"name": "Ada"}))
            .unwrap();
        poller.poll_once().await;
        assert_eq!(handle.snapshot().pending_changes, 1);
    }

    #[tokio::test]
    async fn regained_connectivity_triggers_one_sync() {
        let (mut poller, _handle) = poller_with(MockTransport::up(SyncMode::Online));
        poller.syncer.shared_state().set_mode(SyncMode::Offline);

        poller.poll_once().await;
        assert_eq!(poller.syncer.transport().push_calls.load(Ordering::SeqCst), 1);

        // Still online, cadence not due: no second trigger.
        poller.poll_once().await;
        assert_eq!(poller.syncer.transport().push_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_cadence_triggers_sync_when_due() {
        let (mut poller, _handle) = poller_with(MockTransport::up(SyncMode::Online));
        poller.poll_once().await;
        assert_eq!(poller.syncer.transport().push_calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(AUTO_SYNC_INTERVAL + Duration::from_secs(1)).await;
        poller.poll_once().await;
        assert_eq!(poller.syncer.transport().push_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_channel_ends_the_loop() {
        let (poller, handle) = poller_with(MockTransport::up(SyncMode::Online));
        let task = tokio::spawn(poller.run());
        tokio::task::yield_now().await;
        handle.stop();
        task.await.unwrap();
    }
}
