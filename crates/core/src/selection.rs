//! Rows the user has marked for import.

use serde::Serialize;

use crate::classify::can_select;
use crate::types::DbId;
use crate::upload::UploadSnapshot;

/// Flags from the surrounding step that gate row selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SelectionContext {
    /// The session is being viewed from history and cannot be changed.
    pub read_only: bool,
    /// Every row of the session has reached a terminal status.
    pub all_finished: bool,
}

impl SelectionContext {
    /// Context derived from a snapshot alone.
    pub fn from_snapshot(snapshot: &UploadSnapshot) -> Self {
        Self {
            read_only: snapshot.is_read_only,
            all_finished: snapshot.all_finished(),
        }
    }
}

/// Current import selection.
///
/// Each selection-change event replaces the whole set; ids are never
/// accumulated across events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSelection {
    ids: Vec<DbId>,
}

impl ImportSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection with the latest payload from the row table.
    pub fn replace(&mut self, ids: impl IntoIterator<Item = DbId>) {
        self.ids = ids.into_iter().collect();
    }

    /// Replace the selection, keeping only ids whose row in `snapshot` can
    /// be selected under `ctx`. Returns the ids that were dropped.
    pub fn replace_selectable(
        &mut self,
        ids: impl IntoIterator<Item = DbId>,
        snapshot: &UploadSnapshot,
        ctx: SelectionContext,
    ) -> Vec<DbId> {
        let (kept, dropped): (Vec<_>, Vec<_>) = ids.into_iter().partition(|id| {
            snapshot
                .row(*id)
                .is_ok_and(|row| can_select(row, ctx))
        });
        self.ids = kept;
        dropped
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn ids(&self) -> &[DbId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Comma-separated ids, the form the ready-to-review endpoint expects.
    pub fn to_payload(&self) -> String {
        self.ids
            .iter()
            .map(DbId::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}
