//! Events emitted by the upload status poller.
//!
//! The full row set is published separately as an immutable snapshot on a
//! `watch` channel; these events only mark transitions the host reacts to.

use georepo_core::types::DbId;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    /// A new row set replaced the previous one.
    SnapshotUpdated {
        session_id: DbId,
        rows: usize,
        unfinished: usize,
    },

    /// The host should allow or block edits to earlier wizard steps.
    EditableChanged { session_id: DbId, editable: bool },

    /// Every row reached a terminal status. Emitted once per poller.
    AllFinished {
        session_id: DbId,
        read_only: bool,
        error_rows: usize,
    },

    /// A status fetch failed; it is retried on the next tick.
    PollFailed { session_id: DbId, error: String },
}
