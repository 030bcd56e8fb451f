//! View models for the upload review step.
//!
//! [`ErrorDetailPresenter`] is the state behind the error detail dialog:
//! which row is shown, the summary grid, the report download, and whether
//! the overlap drill-down is active. [`RowView`] is what the row table
//! renders for each upload row. Rendering itself belongs to the caller.

use serde::Serialize;

use crate::checks::{CheckCategory, CheckName, CheckSeverity};
use crate::classify::{can_select, has_overlap_error, reports_overlaps};
use crate::error::CoreError;
use crate::selection::SelectionContext;
use crate::types::DbId;
use crate::upload::{ErrorSummary, UploadRow, UploadStatus};

/// File name offered when saving an error report.
pub const REPORT_FILE_NAME: &str = "error_report.csv";

/// Display format for local start times.
const STARTED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Summary grid
// ---------------------------------------------------------------------------

/// How a grid cell should be highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFlag {
    /// Zero or absent count.
    Blank,
    Warning,
    Error,
}

pub fn cell_flag(check: CheckName, count: u64) -> CellFlag {
    match (count, check.severity()) {
        (0, _) => CellFlag::Blank,
        (_, CheckSeverity::Warning) => CellFlag::Warning,
        (_, CheckSeverity::Blocking) => CellFlag::Error,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridColumn {
    pub check: CheckName,
    pub header: &'static str,
    pub description: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnGroup {
    pub category: CheckCategory,
    pub title: &'static str,
    pub columns: Vec<GridColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridCell {
    pub check: CheckName,
    /// `None` renders blank.
    pub count: Option<u64>,
    pub flag: CellFlag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridRow {
    pub level: i32,
    pub entity: String,
    /// One cell per displayed column, in column order.
    pub cells: Vec<GridCell>,
}

/// Error summaries laid out as one line per level and one column per check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorGrid {
    pub groups: Vec<ColumnGroup>,
    pub rows: Vec<GridRow>,
}

impl ErrorGrid {
    pub fn from_summaries(summaries: &[ErrorSummary]) -> Self {
        let groups = CheckCategory::ALL
            .into_iter()
            .map(|category| ColumnGroup {
                category,
                title: category.title(),
                columns: displayed_checks()
                    .filter(|check| check.category() == category)
                    .map(|check| GridColumn {
                        check,
                        header: check.as_str(),
                        description: check.description(),
                    })
                    .collect(),
            })
            .collect();

        let rows = summaries
            .iter()
            .map(|summary| GridRow {
                level: summary.level,
                entity: summary.entity.clone(),
                cells: displayed_checks()
                    .map(|check| {
                        let count = summary.count(check);
                        GridCell {
                            check,
                            count: (count > 0).then_some(count),
                            flag: cell_flag(check, count),
                        }
                    })
                    .collect(),
            })
            .collect();

        Self { groups, rows }
    }

    /// Columns in display order, flattened across groups.
    pub fn columns(&self) -> impl Iterator<Item = &GridColumn> {
        self.groups.iter().flat_map(|group| group.columns.iter())
    }
}

/// Checks shown as columns, grouped by category in display order.
fn displayed_checks() -> impl Iterator<Item = CheckName> {
    CheckCategory::ALL.into_iter().flat_map(|category| {
        CheckName::ALL
            .into_iter()
            .filter(move |check| check.is_displayed() && check.category() == category)
    })
}

// ---------------------------------------------------------------------------
// Error detail dialog
// ---------------------------------------------------------------------------

/// A report the user can save. The href is passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportDownload {
    pub file_name: &'static str,
    pub href: String,
}

/// Which sub-view of the dialog is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailView {
    Summary,
    Overlaps { upload_id: DbId },
}

/// Contents of an open error detail dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub row_id: DbId,
    pub grid: ErrorGrid,
    pub report: Option<ReportDownload>,
    /// The overlap drill-down affordance should be offered.
    pub has_overlap_error: bool,
    /// Row whose overlaps the drill-down would show, if any summary has them.
    pub overlap_upload_id: Option<DbId>,
    pub view: DetailView,
}

#[derive(Debug, Default)]
pub struct ErrorDetailPresenter {
    open: Option<ErrorDetail>,
}

impl ErrorDetailPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the dialog for a row. Any previous dialog state is discarded.
    pub fn show_error(
        &mut self,
        row_id: DbId,
        summaries: &[ErrorSummary],
        report_path: Option<&str>,
        is_importable: bool,
    ) -> &ErrorDetail {
        let overlaps = reports_overlaps(summaries);
        let detail = ErrorDetail {
            row_id,
            grid: ErrorGrid::from_summaries(summaries),
            report: report_path
                .filter(|path| !path.is_empty())
                .map(|path| ReportDownload {
                    file_name: REPORT_FILE_NAME,
                    href: path.to_string(),
                }),
            has_overlap_error: has_overlap_error(summaries, is_importable),
            overlap_upload_id: overlaps.then_some(row_id),
            view: DetailView::Summary,
        };
        self.open.insert(detail)
    }

    pub fn show_row(&mut self, row: &UploadRow) -> &ErrorDetail {
        self.show_error(
            row.id,
            &row.error_summaries,
            row.error_report_path.as_deref(),
            row.is_importable,
        )
    }

    /// Switch to the overlap drill-down.
    pub fn open_overlaps(&mut self) -> Result<DbId, CoreError> {
        let detail = self
            .open
            .as_mut()
            .ok_or_else(|| CoreError::Validation("error details are not open".into()))?;
        match (detail.has_overlap_error, detail.overlap_upload_id) {
            (true, Some(upload_id)) => {
                detail.view = DetailView::Overlaps { upload_id };
                Ok(upload_id)
            }
            _ => Err(CoreError::Validation(format!(
                "row {} has no actionable overlap errors",
                detail.row_id
            ))),
        }
    }

    pub fn back_to_summary(&mut self) {
        if let Some(detail) = self.open.as_mut() {
            detail.view = DetailView::Summary;
        }
    }

    /// Close the dialog. Reopening always starts at the summary grid.
    pub fn close(&mut self) {
        self.open = None;
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn detail(&self) -> Option<&ErrorDetail> {
        self.open.as_ref()
    }

    pub fn report_download(&self) -> Option<&ReportDownload> {
        self.open.as_ref().and_then(|detail| detail.report.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Row table
// ---------------------------------------------------------------------------

/// Button shown in the status column of an errored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorAction {
    pub label: &'static str,
    pub severity: CheckSeverity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCell {
    pub label: String,
    /// Show a spinner next to the label.
    pub in_progress: bool,
    pub action: Option<ErrorAction>,
}

pub fn status_cell(row: &UploadRow) -> StatusCell {
    match &row.status {
        UploadStatus::Started => StatusCell {
            label: row.status.to_string(),
            in_progress: true,
            action: None,
        },
        UploadStatus::Processing => StatusCell {
            label: match &row.progress {
                Some(progress) => format!("{} {progress}", row.status),
                None => row.status.to_string(),
            },
            in_progress: true,
            action: None,
        },
        UploadStatus::Error if row.is_warning => StatusCell {
            label: "Warning".into(),
            in_progress: false,
            action: Some(ErrorAction {
                label: "Show Warning",
                severity: CheckSeverity::Warning,
            }),
        },
        UploadStatus::Error => StatusCell {
            label: "Error".into(),
            in_progress: false,
            action: Some(ErrorAction {
                label: "Show Error",
                severity: CheckSeverity::Blocking,
            }),
        },
        UploadStatus::Valid | UploadStatus::Other(_) => StatusCell {
            label: row.status.to_string(),
            in_progress: false,
            action: None,
        },
    }
}

/// One line of the upload row table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowView {
    pub id: DbId,
    pub status: StatusCell,
    /// Start time in local time.
    pub started_at: String,
    pub selectable: bool,
}

impl RowView {
    pub fn new(row: &UploadRow, ctx: SelectionContext) -> Self {
        Self {
            id: row.id,
            status: status_cell(row),
            started_at: row.started_at_local().format(STARTED_AT_FORMAT).to_string(),
            selectable: can_select(row, ctx),
        }
    }
}
