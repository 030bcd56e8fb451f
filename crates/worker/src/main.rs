mod config;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use georepo_client::api::{ApiError, GeoRepoApi};
use georepo_client::config::ConfigError;
use georepo_client::events::UploadEvent;
use georepo_client::import::ImportGate;
use georepo_client::notifications::{NotificationEvent, NotificationPoller};
use georepo_client::poll_interval::PollInterval;
use georepo_client::poller::UploadStatusPoller;
use georepo_core::classify::classify;
use georepo_core::presenter::{CellFlag, ErrorDetailPresenter, RowView};
use georepo_core::upload::UploadSnapshot;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;

/// How long to keep listening for the review job's notification.
const NOTIFICATION_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "georepo_worker=debug,georepo_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), WorkerError> {
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        api_url = %config.client.api_url,
        session_id = config.session_id,
        auto_import = config.auto_import,
        "Worker starting",
    );

    let api = Arc::new(GeoRepoApi::new(&config.client)?);
    let poll_interval = PollInterval::default();

    let mut notifier = NotificationPoller::new(api.clone(), poll_interval.clone());
    let notifications = notifier.subscribe();
    notifier.start();

    let mut poller = UploadStatusPoller::new(
        api.clone(),
        config.session_id,
        config.client.status_poll_interval,
    )
    .on_finished(|snapshot| {
        tracing::info!(
            session_id = snapshot.session_id,
            "Validation finished, earlier steps are editable again",
        );
    });
    let event_logger = tokio::spawn(log_upload_events(poller.subscribe()));
    poller.start();

    let snapshot = tokio::select! {
        snapshot = poller.wait_until_finished() => snapshot,
        _ = shutdown_signal() => {
            tracing::info!("Shutdown requested before validation finished");
            None
        }
    };
    poller.stop();
    event_logger.abort();

    let Some(snapshot) = snapshot else {
        notifier.stop();
        return Ok(());
    };

    report_rows(&snapshot, poller.selection_context());

    if let Some(dir) = &config.report_dir {
        download_reports(&api, &snapshot, dir).await;
    }

    if config.auto_import {
        let mut gate = ImportGate::new(api.clone(), poll_interval.clone(), config.client.is_admin);
        gate.rows_changed(snapshot.clone(), poller.selection_context());
        let skipped = gate.selection_changed(snapshot.rows.iter().map(|row| row.id));
        if !skipped.is_empty() {
            tracing::info!(?skipped, "Rows not importable, leaving them out");
        }

        if gate.can_submit() {
            match gate.submit().await {
                Ok(destination) => {
                    tracing::info!(destination = %destination, "Import submitted");
                    wait_for_notifications(notifications).await;
                }
                Err(e) => tracing::error!(alert = %e.user_message(), "Import was not submitted"),
            }
        } else {
            tracing::info!("Nothing to import");
        }
    }

    notifier.stop();
    tracing::info!("Worker finished");
    Ok(())
}

/// Log one line per row plus the failing cells of errored rows.
fn report_rows(snapshot: &UploadSnapshot, ctx: georepo_core::selection::SelectionContext) {
    let mut presenter = ErrorDetailPresenter::new();

    for row in &snapshot.rows {
        let view = RowView::new(row, ctx);
        let classification = classify(row);
        tracing::info!(
            row_id = view.id,
            status = %view.status.label,
            started_at = %view.started_at,
            selectable = view.selectable,
            warning_only = classification.is_warning_only,
            overlap_error = classification.has_overlap_error,
            "Upload row",
        );

        if view.status.action.is_none() {
            continue;
        }
        let detail = presenter.show_row(row);
        for grid_row in &detail.grid.rows {
            for cell in grid_row.cells.iter().filter(|c| c.flag != CellFlag::Blank) {
                tracing::info!(
                    row_id = row.id,
                    entity = %grid_row.entity,
                    level = grid_row.level,
                    check = %cell.check,
                    count = cell.count.unwrap_or_default(),
                    blocking = cell.flag == CellFlag::Error,
                    "Check failed",
                );
            }
        }
        presenter.close();
    }
}

/// Save each errored row's report under `<dir>/<row id>/`.
async fn download_reports(api: &GeoRepoApi, snapshot: &UploadSnapshot, dir: &Path) {
    for row in snapshot.error_rows() {
        let Some(href) = row.error_report_path.as_deref() else {
            continue;
        };
        let dest = dir.join(row.id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&dest).await {
            tracing::warn!(row_id = row.id, error = %e, "Cannot create report directory");
            continue;
        }
        match api.download_report(href, &dest).await {
            Ok(path) => tracing::info!(row_id = row.id, path = %path.display(), "Error report saved"),
            Err(e) => tracing::warn!(row_id = row.id, error = %e, "Error report download failed"),
        }
    }
}

async fn log_upload_events(mut rx: broadcast::Receiver<UploadEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = %json, "Upload event"),
                Err(e) => tracing::warn!(error = %e, "Unserializable upload event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Upload event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Log notifications until the first batch arrives or the wait runs out.
async fn wait_for_notifications(mut rx: broadcast::Receiver<NotificationEvent>) {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(NotificationEvent::Received { notifications }) => {
                    for notification in notifications {
                        tracing::info!(
                            id = notification.id,
                            kind = %notification.kind,
                            severity = %notification.severity(),
                            target = ?notification.target().map(|t| t.path()),
                            "{}",
                            notification.message,
                        );
                    }
                    return;
                }
                Ok(NotificationEvent::MaintenanceChanged { maintenance }) => match maintenance {
                    Some(m) => tracing::warn!(id = m.id, "Maintenance: {}", m.message),
                    None => tracing::info!("Maintenance ended"),
                },
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    };

    tokio::select! {
        _ = wait => {}
        _ = tokio::time::sleep(NOTIFICATION_WAIT) => {
            tracing::info!("No notification received, exiting");
        }
        _ = shutdown_signal() => {}
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
