//! Shared polling-frequency signal.
//!
//! The notification poller reads this value to pace itself; the import
//! gate raises the frequency after triggering a background job so its
//! completion notice shows up quickly. Both hold a cloned [`PollInterval`]
//! handle instead of touching global state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cadence used when nothing is pending.
pub const FETCH_INTERVAL_NORMAL: Duration = Duration::from_secs(60);

/// Cadence used while a triggered background job is expected to finish.
pub const FETCH_INTERVAL_JOB: Duration = Duration::from_secs(5);

/// Shortest accepted period; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Raise `interval` to [`MIN_POLL_INTERVAL`] if it is shorter.
pub fn clamp_interval(interval: Duration) -> Duration {
    if interval < MIN_POLL_INTERVAL {
        tracing::warn!(
            requested_ms = interval.as_millis() as u64,
            "Poll interval too short, clamping",
        );
        return MIN_POLL_INTERVAL;
    }
    interval
}

/// Cloneable handle to the shared polling interval.
///
/// Writers call [`set`](Self::set); readers either [`get`](Self::get) the
/// current value or [`subscribe`](Self::subscribe) to be woken on change.
#[derive(Debug, Clone)]
pub struct PollInterval {
    tx: Arc<watch::Sender<Duration>>,
}

impl PollInterval {
    pub fn new(initial: Duration) -> Self {
        let (tx, _) = watch::channel(clamp_interval(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> Duration {
        *self.tx.borrow()
    }

    /// Update the interval. Subscribers are only woken when the value
    /// actually changes.
    pub fn set(&self, interval: Duration) {
        let interval = clamp_interval(interval);
        self.tx.send_if_modified(|current| {
            if *current == interval {
                return false;
            }
            tracing::debug!(
                from_ms = current.as_millis() as u64,
                to_ms = interval.as_millis() as u64,
                "Poll interval changed",
            );
            *current = interval;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Duration> {
        self.tx.subscribe()
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self::new(FETCH_INTERVAL_NORMAL)
    }
}
