//! Import gate: submits the selected upload rows for review.

use std::fmt;
use std::sync::Arc;

use georepo_core::selection::{ImportSelection, SelectionContext};
use georepo_core::types::DbId;
use georepo_core::upload::UploadSnapshot;

use crate::api::{ApiError, GeoRepoApi};
use crate::poll_interval::{PollInterval, FETCH_INTERVAL_JOB};

/// Alert text used when the server gives no structured reason.
pub const GENERIC_IMPORT_ERROR: &str = "Error importing data";

/// Base route of the review listing.
const REVIEW_LIST_PATH: &str = "/review_list";

/// Where the host should navigate after a successful submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDestination {
    /// The review session created for this submit.
    Session(DbId),
    /// The generic review listing.
    Listing,
}

impl ReviewDestination {
    pub fn path(&self) -> String {
        match self {
            ReviewDestination::Session(id) => format!("{REVIEW_LIST_PATH}?upload={id}"),
            ReviewDestination::Listing => REVIEW_LIST_PATH.to_string(),
        }
    }
}

impl fmt::Display for ReviewDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Why a submit did not go through. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Nothing is selected; no request was sent.
    #[error("No rows selected for import")]
    EmptySelection,

    /// The session is read-only; no request was sent.
    #[error("Upload session is read-only")]
    ReadOnly,

    /// Some rows are still validating; no request was sent.
    #[error("Upload rows are still being validated")]
    NotFinished,

    /// The server rejected the import with a reason.
    #[error("{0}")]
    Detail(String),

    /// The import failed without a structured reason.
    #[error("Error importing data")]
    Generic(#[source] ApiError),
}

impl SubmitError {
    /// Text for the blocking alert shown to the user.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<ApiError> for SubmitError {
    fn from(err: ApiError) -> Self {
        match err.detail().filter(|detail| !detail.trim().is_empty()) {
            Some(detail) => SubmitError::Detail(detail.to_string()),
            None => SubmitError::Generic(err),
        }
    }
}

/// Tracks the rows selected for import and submits them.
///
/// Only rows that pass [`can_select`] against the latest snapshot are ever
/// held in the selection. Until a snapshot arrives nothing is selectable.
pub struct ImportGate {
    api: Arc<GeoRepoApi>,
    poll_interval: PollInterval,
    /// Caller may open the review session it just created.
    privileged: bool,
    rows: Option<Arc<UploadSnapshot>>,
    ctx: SelectionContext,
    selection: ImportSelection,
}

impl ImportGate {
    pub fn new(api: Arc<GeoRepoApi>, poll_interval: PollInterval, privileged: bool) -> Self {
        Self {
            api,
            poll_interval,
            privileged,
            rows: None,
            ctx: SelectionContext::default(),
            selection: ImportSelection::new(),
        }
    }

    /// Adopt a new row snapshot. Selected ids that are no longer
    /// selectable are dropped.
    pub fn rows_changed(&mut self, snapshot: Arc<UploadSnapshot>, ctx: SelectionContext) {
        let current = self.selection.ids().to_vec();
        let dropped = self.selection.replace_selectable(current, &snapshot, ctx);
        if !dropped.is_empty() {
            tracing::debug!(?dropped, "Selection pruned after row refresh");
        }
        self.rows = Some(snapshot);
        self.ctx = ctx;
    }

    /// Replace the selection with the row table's latest payload.
    ///
    /// Ids that are unknown or not selectable are left out and returned.
    pub fn selection_changed(&mut self, ids: impl IntoIterator<Item = DbId>) -> Vec<DbId> {
        let dropped = match &self.rows {
            Some(snapshot) => self.selection.replace_selectable(ids, snapshot, self.ctx),
            None => {
                self.selection.clear();
                ids.into_iter().collect()
            }
        };
        if !dropped.is_empty() {
            tracing::debug!(?dropped, "Ignoring rows that cannot be selected");
        }
        dropped
    }

    pub fn selection(&self) -> &ImportSelection {
        &self.selection
    }

    /// Whether the submit control is enabled.
    pub fn can_submit(&self) -> bool {
        !self.ctx.read_only && self.ctx.all_finished && !self.selection.is_empty()
    }

    /// Submit the current selection for review.
    ///
    /// On success the shared poll interval is switched to the job cadence
    /// and the navigation target is returned.
    pub async fn submit(&self) -> Result<ReviewDestination, SubmitError> {
        if self.ctx.read_only {
            return Err(SubmitError::ReadOnly);
        }
        if !self.ctx.all_finished {
            return Err(SubmitError::NotFinished);
        }
        if self.selection.is_empty() {
            return Err(SubmitError::EmptySelection);
        }

        let response = self
            .api
            .ready_to_review(&self.selection)
            .await
            .map_err(|e| {
                tracing::error!(
                    selected = self.selection.len(),
                    error = %e,
                    "Import request failed",
                );
                SubmitError::from(e)
            })?;

        self.poll_interval.set(FETCH_INTERVAL_JOB);

        let destination = match response.session_id {
            Some(id) if self.privileged => ReviewDestination::Session(id),
            _ => ReviewDestination::Listing,
        };
        tracing::info!(
            selected = self.selection.len(),
            destination = %destination,
            "Rows sent to review",
        );
        Ok(destination)
    }
}
