//! User notification polling.
//!
//! [`NotificationPoller`] paces itself from the shared [`PollInterval`]:
//! whenever the interval changes the ticker is re-armed and a fetch is
//! issued immediately. Receiving notifications resets the interval to
//! [`FETCH_INTERVAL_NORMAL`]. Maintenance announcements are tracked as a
//! separate piece of state.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::NotificationSource;
use crate::poll_interval::{PollInterval, FETCH_INTERVAL_NORMAL};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Module used for wizard links that do not name one.
const DEFAULT_MODULE: &str = "admin_boundaries";

const UPLOAD_SESSION_LIST_PATH: &str = "/upload_list";
const REVIEW_LIST_PATH: &str = "/review_list";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub recipient: Option<i64>,
    #[serde(default)]
    pub payload: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Notification {
    fn payload_str(&self, key: &str) -> Option<String> {
        match self.payload.get(key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Alert severity; the payload may override the default `success`.
    pub fn severity(&self) -> String {
        self.payload_str("severity")
            .unwrap_or_else(|| "success".to_string())
    }

    /// Where clicking the notification leads, if anywhere.
    pub fn target(&self) -> Option<NotificationTarget> {
        match self.kind.as_str() {
            "LAYER_VALIDATION" | "PARENT_MATCHING" => {
                let (Some(session), Some(dataset)) =
                    (self.payload_str("session"), self.payload_str("dataset"))
                else {
                    return Some(NotificationTarget::UploadSessionList);
                };
                Some(NotificationTarget::UploadWizard {
                    module: self
                        .payload_str("module")
                        .unwrap_or_else(|| DEFAULT_MODULE.to_string()),
                    session,
                    dataset,
                    step: self.payload_str("step").unwrap_or_default(),
                })
            }
            "BOUNDARY_MATCHING" => Some(NotificationTarget::ReviewList),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    UploadWizard {
        module: String,
        session: String,
        dataset: String,
        step: String,
    },
    UploadSessionList,
    ReviewList,
}

impl NotificationTarget {
    pub fn path(&self) -> String {
        match self {
            NotificationTarget::UploadWizard {
                module,
                session,
                dataset,
                step,
            } => format!("/{module}/upload_wizard/?session={session}&dataset={dataset}&step={step}"),
            NotificationTarget::UploadSessionList => UPLOAD_SESSION_LIST_PATH.to_string(),
            NotificationTarget::ReviewList => REVIEW_LIST_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintenance {
    pub id: i64,
    #[serde(default)]
    pub message: String,
}

/// Response of the notification list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationList {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub has_maintenance: bool,
    #[serde(default)]
    pub maintenance: Option<Maintenance>,
}

impl NotificationList {
    /// Active maintenance window, only when the server flags one.
    pub fn active_maintenance(&self) -> Option<Maintenance> {
        if self.has_maintenance {
            self.maintenance.clone()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    Received { notifications: Vec<Notification> },
    MaintenanceChanged { maintenance: Option<Maintenance> },
}

struct NotifierShared {
    source: Arc<dyn NotificationSource>,
    interval: PollInterval,
    pending: Mutex<VecDeque<Notification>>,
    maintenance_tx: watch::Sender<Option<Maintenance>>,
    event_tx: broadcast::Sender<NotificationEvent>,
}

/// Polls the notification list and queues what arrives.
///
/// Only the front of the queue is meant to be shown at a time.
pub struct NotificationPoller {
    shared: Arc<NotifierShared>,
    active: Option<(CancellationToken, JoinHandle<()>)>,
}

impl NotificationPoller {
    pub fn new(source: Arc<dyn NotificationSource>, interval: PollInterval) -> Self {
        let (maintenance_tx, _) = watch::channel(None);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(NotifierShared {
                source,
                interval,
                pending: Mutex::new(VecDeque::new()),
                maintenance_tx,
                event_tx,
            }),
            active: None,
        }
    }

    pub fn start(&mut self) {
        self.stop();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&self.shared), cancel.clone()));
        self.active = Some((cancel, handle));
    }

    pub fn stop(&mut self) {
        if let Some((cancel, handle)) = self.active.take() {
            cancel.cancel();
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn maintenance(&self) -> watch::Receiver<Option<Maintenance>> {
        self.shared.maintenance_tx.subscribe()
    }

    /// The notification currently on display.
    pub fn current(&self) -> Option<Notification> {
        self.shared.lock_pending().front().cloned()
    }

    pub fn pending(&self) -> Vec<Notification> {
        self.shared.lock_pending().iter().cloned().collect()
    }

    /// Remove a notification from the queue. Returns `false` if unknown.
    pub fn dismiss(&self, id: i64) -> bool {
        let mut pending = self.shared.lock_pending();
        let before = pending.len();
        pending.retain(|n| n.id != id);
        pending.len() != before
    }

    /// Dismiss a notification and return where it leads.
    pub fn open(&self, id: i64) -> Option<NotificationTarget> {
        let target = self
            .shared
            .lock_pending()
            .iter()
            .find(|n| n.id == id)
            .and_then(Notification::target);
        self.dismiss(id);
        target
    }
}

impl Drop for NotificationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(shared: Arc<NotifierShared>, cancel: CancellationToken) {
    let mut interval_rx = shared.interval.subscribe();

    loop {
        let period = *interval_rx.borrow_and_update();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval_ms = period.as_millis() as u64, "Notification poll armed");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = shared.poll_once() => {}
                    }
                }
            }
        }
    }
}

impl NotifierShared {
    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: NotificationEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn poll_once(&self) {
        let list = match self.source.fetch_notifications().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "Notification fetch failed");
                return;
            }
        };

        let maintenance = list.active_maintenance();

        if !list.notifications.is_empty() {
            tracing::info!(count = list.notifications.len(), "Notifications received");
            self.lock_pending()
                .extend(list.notifications.iter().cloned());
            self.publish(NotificationEvent::Received {
                notifications: list.notifications,
            });
            self.interval.set(FETCH_INTERVAL_NORMAL);
        }

        let changed = self.maintenance_tx.send_if_modified(|current| {
            if *current == maintenance {
                return false;
            }
            *current = maintenance.clone();
            true
        });
        if changed {
            tracing::info!(active = maintenance.is_some(), "Maintenance state changed");
            self.publish(NotificationEvent::MaintenanceChanged { maintenance });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use crate::api::ApiError;
    use crate::poll_interval::FETCH_INTERVAL_JOB;

    struct QueueSource {
        responses: Mutex<VecDeque<NotificationList>>,
        calls: AtomicUsize,
    }

    impl QueueSource {
        fn new(responses: Vec<NotificationList>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotificationSource for QueueSource {
        async fn fetch_notifications(&self) -> Result<NotificationList, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn notification(id: i64, kind: &str, payload: serde_json::Value) -> Notification {
        Notification {
            id,
            kind: kind.into(),
            message: format!("notification {id}"),
            recipient: Some(1),
            payload: serde_json::from_value(payload).unwrap(),
            created_at: None,
        }
    }

    #[test]
    fn targets_follow_notification_type() {
        let wizard = notification(
            1,
            "LAYER_VALIDATION",
            serde_json::json!({"session": "4", "dataset": 2, "step": "3"}),
        );
        assert_eq!(
            wizard.target().unwrap().path(),
            "/admin_boundaries/upload_wizard/?session=4&dataset=2&step=3"
        );

        let missing = notification(2, "PARENT_MATCHING", serde_json::json!({"session": "4"}));
        assert_eq!(missing.target(), Some(NotificationTarget::UploadSessionList));

        let review = notification(3, "BOUNDARY_MATCHING", serde_json::json!({}));
        assert_eq!(review.target().unwrap().path(), "/review_list");

        assert_eq!(notification(4, "OTHER", serde_json::json!({})).target(), None);
    }

    #[test]
    fn severity_defaults_to_success() {
        assert_eq!(notification(1, "X", serde_json::json!({})).severity(), "success");
        let error = notification(1, "X", serde_json::json!({"severity": "error"}));
        assert_eq!(error.severity(), "error");
    }

    #[test]
    fn maintenance_requires_flag() {
        let list: NotificationList = serde_json::from_value(serde_json::json!({
            "notifications": [],
            "has_maintenance": false,
            "maintenance": {"id": 1, "message": "stale"}
        }))
        .unwrap();
        assert_eq!(list.active_maintenance(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_reset_interval_and_queue() {
        let source = QueueSource::new(vec![NotificationList {
            notifications: vec![notification(7, "BOUNDARY_MATCHING", serde_json::json!({}))],
            has_maintenance: true,
            maintenance: Some(Maintenance {
                id: 2,
                message: "Upgrade tonight".into(),
            }),
        }]);
        let interval = PollInterval::new(FETCH_INTERVAL_JOB);
        let mut poller = NotificationPoller::new(source.clone(), interval.clone());
        let mut events = poller.subscribe();
        poller.start();

        assert_matches!(
            events.recv().await.unwrap(),
            NotificationEvent::Received { notifications } if notifications.len() == 1
        );
        assert_matches!(
            events.recv().await.unwrap(),
            NotificationEvent::MaintenanceChanged { maintenance: Some(_) }
        );
        assert_eq!(interval.get(), FETCH_INTERVAL_NORMAL);
        assert_eq!(poller.current().map(|n| n.id), Some(7));

        assert_eq!(poller.open(7), Some(NotificationTarget::ReviewList));
        assert!(poller.current().is_none());
        assert!(!poller.dismiss(7));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_rearms_ticker() {
        let source = QueueSource::new(Vec::new());
        let interval = PollInterval::default();
        let mut poller = NotificationPoller::new(source.clone(), interval.clone());
        poller.start();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 1);

        // Switching to the job cadence fetches immediately, then every 5s.
        interval.set(FETCH_INTERVAL_JOB);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.calls(), 2);
        tokio::time::sleep(FETCH_INTERVAL_JOB * 2).await;
        assert_eq!(source.calls(), 4);

        poller.stop();
        tokio::time::sleep(FETCH_INTERVAL_NORMAL).await;
        assert_eq!(source.calls(), 4);
    }
}
