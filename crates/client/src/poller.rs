//! Upload status poller.
//!
//! [`UploadStatusPoller`] fetches the full row set of an upload session on
//! a fixed cadence until every row has reached a terminal status. Each
//! response replaces the previous snapshot wholesale and is published on a
//! `watch` channel; transitions are announced as [`UploadEvent`]s on a
//! `broadcast` channel.
//!
//! Only one polling task exists per poller: [`UploadStatusPoller::start`]
//! cancels any running task before spawning a new one. Within a task
//! fetches run one at a time, so responses are applied strictly in request
//! order; a slow fetch is bounded by the HTTP request timeout and pushes
//! the next tick back. Once "all finished" has been observed the poller
//! never polls again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use georepo_core::selection::SelectionContext;
use georepo_core::types::DbId;
use georepo_core::upload::UploadSnapshot;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::{StatusSource, UploadStatusPage};
use crate::events::UploadEvent;
use crate::poll_interval::clamp_interval;

/// Default cadence between status fetches.
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Broadcast channel capacity for poller events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

type FinishedCallback = Box<dyn FnOnce(&UploadSnapshot) + Send>;

/// State shared between the poller handle and its polling task.
struct PollerShared {
    source: Arc<dyn StatusSource>,
    session_id: DbId,
    interval: Duration,
    snapshot_tx: watch::Sender<Option<Arc<UploadSnapshot>>>,
    event_tx: broadcast::Sender<UploadEvent>,
    /// Latched once every row is terminal; never reset.
    finished: AtomicBool,
    on_finished: Mutex<Option<FinishedCallback>>,
}

/// Internal bookkeeping for the running task.
struct ActivePoll {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the status of one upload session.
///
/// Dropping the poller stops its task.
pub struct UploadStatusPoller {
    shared: Arc<PollerShared>,
    active: Option<ActivePoll>,
}

impl UploadStatusPoller {
    pub fn new(source: Arc<dyn StatusSource>, session_id: DbId, interval: Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(None);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(PollerShared {
                source,
                session_id,
                interval: clamp_interval(interval),
                snapshot_tx,
                event_tx,
                finished: AtomicBool::new(false),
                on_finished: Mutex::new(None),
            }),
            active: None,
        }
    }

    /// Register a callback fired once when an editable session finishes.
    pub fn on_finished(self, callback: impl FnOnce(&UploadSnapshot) + Send + 'static) -> Self {
        *self
            .shared
            .on_finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self
    }

    pub fn session_id(&self) -> DbId {
        self.shared.session_id
    }

    /// Start polling. A task that is already running is cancelled first.
    ///
    /// Does nothing once the session has been seen all finished.
    pub fn start(&mut self) {
        self.stop();

        if self.is_all_finished() {
            tracing::debug!(
                session_id = self.shared.session_id,
                "Upload already finished, not polling",
            );
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));
        self.active = Some(ActivePoll { cancel, handle });
    }

    /// Restart polling if no task is running, fetching immediately.
    ///
    /// A running poller is left alone so its cadence is not reset.
    pub fn refresh(&mut self) {
        if !self.is_running() {
            self.start();
        }
    }

    /// Stop the polling task, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    pub fn is_all_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Subscribe to transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Receiver for the latest snapshot (`None` until the first fetch).
    pub fn snapshots(&self) -> watch::Receiver<Option<Arc<UploadSnapshot>>> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn latest(&self) -> Option<Arc<UploadSnapshot>> {
        self.shared.snapshot_tx.borrow().clone()
    }

    /// Flags needed to decide row selectability for the current snapshot.
    pub fn selection_context(&self) -> SelectionContext {
        SelectionContext {
            read_only: self.latest().is_some_and(|s| s.is_read_only),
            all_finished: self.is_all_finished(),
        }
    }

    /// Wait until a snapshot with every row finished is published.
    ///
    /// Returns `None` if the poller is dropped first. A stopped poller that
    /// never finished leaves this pending.
    pub async fn wait_until_finished(&self) -> Option<Arc<UploadSnapshot>> {
        let mut rx = self.snapshots();
        let result = rx
            .wait_for(|snapshot| snapshot.as_ref().is_some_and(|s| s.all_finished()))
            .await;
        match result {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => None,
        }
    }
}

impl Drop for UploadStatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the polling task.
async fn run(shared: Arc<PollerShared>, cancel: CancellationToken) {
    let session_id = shared.session_id;
    let mut ticker = tokio::time::interval(shared.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        session_id,
        interval_ms = shared.interval.as_millis() as u64,
        "Upload status poller started",
    );

    loop {
        // The first tick completes immediately. A fetch that outlives the
        // interval delays the next tick instead of being dropped.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = shared.source.fetch_status(session_id) => result,
        };

        match fetched {
            Err(e) => {
                tracing::warn!(session_id, error = %e, "Status fetch failed, retrying next tick");
                shared.publish(UploadEvent::PollFailed {
                    session_id,
                    error: e.to_string(),
                });
            }
            Ok(page) => {
                if shared.apply(page) {
                    break;
                }
            }
        }
    }

    tracing::info!(session_id, "Upload status poller stopped");
}

impl PollerShared {
    fn publish(&self, event: UploadEvent) {
        // Ignore the SendError, it only means there are no subscribers.
        let _ = self.event_tx.send(event);
    }

    /// Publish a fetched page. Returns `true` when polling should stop.
    fn apply(&self, page: UploadStatusPage) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return true;
        }

        let snapshot = Arc::new(UploadSnapshot::new(
            self.session_id,
            page.is_read_only,
            page.results,
        ));
        let all_finished = snapshot.all_finished();
        if all_finished {
            // Waiters must never see a finished snapshot with the latch unset.
            self.finished.store(true, Ordering::Release);
        }
        let previous = self.snapshot_tx.send_replace(Some(Arc::clone(&snapshot)));

        let unfinished = snapshot.unfinished_count();
        tracing::debug!(
            session_id = self.session_id,
            rows = snapshot.rows.len(),
            unfinished,
            "Upload status refreshed",
        );
        self.publish(UploadEvent::SnapshotUpdated {
            session_id: self.session_id,
            rows: snapshot.rows.len(),
            unfinished,
        });

        if !all_finished {
            if previous.is_none() {
                self.publish(UploadEvent::EditableChanged {
                    session_id: self.session_id,
                    editable: false,
                });
            }
            return false;
        }

        if !snapshot.is_read_only {
            self.publish(UploadEvent::EditableChanged {
                session_id: self.session_id,
                editable: true,
            });
            let callback = self
                .on_finished
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(callback) = callback {
                callback(&snapshot);
            }
        }

        let error_rows = snapshot.error_rows().count();
        tracing::info!(
            session_id = self.session_id,
            read_only = snapshot.is_read_only,
            error_rows,
            "All upload rows finished",
        );
        self.publish(UploadEvent::AllFinished {
            session_id: self.session_id,
            read_only: snapshot.is_read_only,
            error_rows,
        });

        true
    }
}
