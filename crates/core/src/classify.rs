//! Error classification for upload rows.
//!
//! Pure logic, no I/O: derives warning-only and overlap flags from a row's
//! error summaries and decides whether the row may be selected for import.

use serde::Serialize;

use crate::checks::CheckName;
use crate::selection::SelectionContext;
use crate::upload::{ErrorSummary, UploadRow};

/// Outcome of classifying one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// No summary has a positive count under a blocking check.
    pub is_warning_only: bool,
    /// Some summary reports overlaps and the row is importable, so the
    /// overlap drill-down is worth offering.
    pub has_overlap_error: bool,
}

pub fn classify(row: &UploadRow) -> Classification {
    Classification {
        is_warning_only: is_warning_only(&row.error_summaries),
        has_overlap_error: has_overlap_error(&row.error_summaries, row.is_importable),
    }
}

/// True when no summary has a positive count under a blocking check.
///
/// Rows without summaries are trivially warning-only.
pub fn is_warning_only(summaries: &[ErrorSummary]) -> bool {
    !summaries
        .iter()
        .flat_map(ErrorSummary::failed_checks)
        .any(CheckName::is_blocking)
}

/// Any summary reports at least one overlap.
pub fn reports_overlaps(summaries: &[ErrorSummary]) -> bool {
    summaries
        .iter()
        .any(|summary| summary.count(CheckName::Overlaps) > 0)
}

/// Overlaps are only actionable on importable rows: when other blocking
/// errors exist, resolving overlaps would not make the row importable.
pub fn has_overlap_error(summaries: &[ErrorSummary], is_importable: bool) -> bool {
    is_importable && reports_overlaps(summaries)
}

/// A row can be selected for import only when the session is editable,
/// every row has finished validating, and the row itself is importable.
pub fn can_select(row: &UploadRow, ctx: SelectionContext) -> bool {
    !ctx.read_only && ctx.all_finished && row.is_importable
}
