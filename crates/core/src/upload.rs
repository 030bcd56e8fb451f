//! Typed upload rows as returned by the entity upload status list.
//!
//! The server sends one JSON object per entity in the upload session.
//! Decoding is strict about the fields this crate uses and explicit about
//! the ones it does not: unrecognised keys are skipped, never carried
//! along. A row whose error data disagrees with its status is rejected.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checks::CheckName;
use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Validation status of one entity in an upload session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UploadStatus {
    Started,
    Processing,
    Valid,
    Error,
    /// Any later lifecycle status (for example rows of a session already
    /// sent to review). Treated as terminal.
    Other(String),
}

impl UploadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            UploadStatus::Started => "Started",
            UploadStatus::Processing => "Processing",
            UploadStatus::Valid => "Valid",
            UploadStatus::Error => "Error",
            UploadStatus::Other(s) => s,
        }
    }

    /// Validation has stopped for this row and the status will not change
    /// without user action.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Started | UploadStatus::Processing)
    }
}

impl From<String> for UploadStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Started" => UploadStatus::Started,
            "Processing" => UploadStatus::Processing,
            "Valid" => UploadStatus::Valid,
            "Error" => UploadStatus::Error,
            _ => UploadStatus::Other(value),
        }
    }
}

impl From<UploadStatus> for String {
    fn from(status: UploadStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorSummary
// ---------------------------------------------------------------------------

/// Check counts for one administrative level of an entity.
///
/// A check that is absent from `counts` passed, the same as a zero count.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct ErrorSummary {
    pub level: i32,
    pub entity: String,
    pub counts: BTreeMap<CheckName, u64>,
}

impl ErrorSummary {
    pub fn new(level: i32, entity: impl Into<String>) -> Self {
        Self {
            level,
            entity: entity.into(),
            counts: BTreeMap::new(),
        }
    }

    /// Builder helper used when assembling summaries by hand.
    pub fn with_count(mut self, check: CheckName, count: u64) -> Self {
        self.counts.insert(check, count);
        self
    }

    pub fn count(&self, check: CheckName) -> u64 {
        self.counts.get(&check).copied().unwrap_or(0)
    }

    /// Checks with a positive count.
    pub fn failed_checks(&self) -> impl Iterator<Item = CheckName> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(check, _)| *check)
    }
}

impl Serialize for ErrorSummary {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.counts.len() + 2))?;
        map.serialize_entry("Level", &self.level)?;
        map.serialize_entry("Entity", &self.entity)?;
        for (check, count) in &self.counts {
            map.serialize_entry(check.as_str(), count)?;
        }
        map.end()
    }
}

impl TryFrom<Map<String, Value>> for ErrorSummary {
    type Error = CoreError;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let level = match map.get("Level") {
            Some(Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| CoreError::Validation("error summary has no valid Level".into()))?;

        let entity = match map.get("Entity") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let mut counts = BTreeMap::new();
        for (key, value) in &map {
            if key == "Level" || key == "Entity" {
                continue;
            }
            // Keys outside the check set (ids, labels added by newer
            // servers) are skipped on purpose.
            let Ok(check) = key.parse::<CheckName>() else {
                continue;
            };
            let count = match value {
                Value::Null => 0,
                Value::Number(n) => n.as_u64().ok_or_else(|| {
                    CoreError::Validation(format!("count for '{key}' must be a non-negative integer"))
                })?,
                other => {
                    return Err(CoreError::Validation(format!(
                        "count for '{key}' must be a number, got {other}"
                    )))
                }
            };
            counts.insert(check, count);
        }

        Ok(Self {
            level,
            entity,
            counts,
        })
    }
}

// ---------------------------------------------------------------------------
// UploadRow
// ---------------------------------------------------------------------------

/// Wire shape of one upload row. Only the fields listed here are read.
#[derive(Debug, Deserialize)]
struct RawUploadRow {
    id: DbId,
    status: UploadStatus,
    #[serde(default)]
    progress: Option<String>,
    #[serde(default)]
    is_importable: bool,
    #[serde(default)]
    is_warning: bool,
    #[serde(default)]
    error_summaries: Option<Vec<ErrorSummary>>,
    #[serde(default, alias = "error_report_path")]
    error_report: Option<String>,
    #[serde(rename = "started at", alias = "started_at")]
    started_at: Timestamp,
}

/// One entity's validation outcome for the current upload session.
///
/// Invariant: `error_summaries` is non-empty iff `status` is
/// [`UploadStatus::Error`]. A report path on any other status is rejected,
/// but an Error row may arrive without one while the server is still
/// writing the report; such a row offers no download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawUploadRow")]
pub struct UploadRow {
    pub id: DbId,
    pub status: UploadStatus,
    /// Human-readable progress, only kept while processing.
    pub progress: Option<String>,
    pub is_importable: bool,
    /// Server flag: every finding of this row is warning-class.
    pub is_warning: bool,
    pub error_summaries: Vec<ErrorSummary>,
    pub error_report_path: Option<String>,
    pub started_at: Timestamp,
}

impl UploadRow {
    /// Check the status/error-data invariant.
    pub fn validate(&self) -> Result<(), CoreError> {
        let is_error = self.status == UploadStatus::Error;
        if is_error && self.error_summaries.is_empty() {
            return Err(CoreError::InvalidRow {
                row_id: self.id,
                reason: "status is Error but no error summaries were reported".into(),
            });
        }
        if !is_error && !self.error_summaries.is_empty() {
            return Err(CoreError::InvalidRow {
                row_id: self.id,
                reason: format!("status is {} but error summaries were reported", self.status),
            });
        }
        if !is_error && self.error_report_path.is_some() {
            return Err(CoreError::InvalidRow {
                row_id: self.id,
                reason: format!("status is {} but an error report was attached", self.status),
            });
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// `started_at` converted to the machine's local time zone.
    pub fn started_at_local(&self) -> DateTime<Local> {
        self.started_at.with_timezone(&Local)
    }
}

impl TryFrom<RawUploadRow> for UploadRow {
    type Error = CoreError;

    fn try_from(raw: RawUploadRow) -> Result<Self, Self::Error> {
        let progress = match raw.status {
            UploadStatus::Processing => raw.progress.filter(|p| !p.is_empty()),
            _ => None,
        };
        let row = Self {
            id: raw.id,
            status: raw.status,
            progress,
            is_importable: raw.is_importable,
            is_warning: raw.is_warning,
            error_summaries: raw.error_summaries.unwrap_or_default(),
            error_report_path: raw.error_report.filter(|p| !p.is_empty()),
            started_at: raw.started_at,
        };
        row.validate()?;
        Ok(row)
    }
}

// ---------------------------------------------------------------------------
// UploadSnapshot
// ---------------------------------------------------------------------------

/// Immutable result of one status fetch for an upload session.
///
/// Each poll produces a new snapshot that replaces the previous one
/// wholesale; rows are never merged across fetches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSnapshot {
    pub session_id: DbId,
    pub is_read_only: bool,
    pub rows: Vec<UploadRow>,
    pub fetched_at: Timestamp,
}

impl UploadSnapshot {
    pub fn new(session_id: DbId, is_read_only: bool, rows: Vec<UploadRow>) -> Self {
        Self {
            session_id,
            is_read_only,
            rows,
            fetched_at: Utc::now(),
        }
    }

    /// Read-only sessions count as finished as soon as they are fetched.
    pub fn all_finished(&self) -> bool {
        self.is_read_only || self.rows.iter().all(UploadRow::is_finished)
    }

    pub fn unfinished_count(&self) -> usize {
        self.rows.iter().filter(|row| !row.is_finished()).count()
    }

    pub fn row(&self, id: DbId) -> Result<&UploadRow, CoreError> {
        self.rows
            .iter()
            .find(|row| row.id == id)
            .ok_or(CoreError::RowNotFound(id))
    }

    pub fn error_rows(&self) -> impl Iterator<Item = &UploadRow> {
        self.rows
            .iter()
            .filter(|row| row.status == UploadStatus::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn decode(value: Value) -> Result<UploadRow, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn decodes_error_row_with_summaries() {
        let row = decode(json!({
            "id": 7,
            "status": "Error",
            "is_importable": true,
            "is_warning": false,
            "started at": "2024-03-01T10:00:00Z",
            "error_report": "/media/error_reports/7.csv",
            "error_summaries": [
                {"Level": 0, "Entity": "Country", "Overlaps": 3, "Gaps": 0, "Row Id": 99}
            ],
            "Country": "Malawi"
        }))
        .unwrap();

        assert_eq!(row.status, UploadStatus::Error);
        assert_eq!(row.error_report_path.as_deref(), Some("/media/error_reports/7.csv"));
        let summary = &row.error_summaries[0];
        assert_eq!(summary.level, 0);
        assert_eq!(summary.count(CheckName::Overlaps), 3);
        assert_eq!(summary.count(CheckName::Gaps), 0);
        assert_eq!(summary.failed_checks().collect::<Vec<_>>(), vec![CheckName::Overlaps]);
    }

    #[test]
    fn progress_is_kept_only_while_processing() {
        let processing = decode(json!({
            "id": 1, "status": "Processing", "progress": "(2/5)",
            "started at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(processing.progress.as_deref(), Some("(2/5)"));

        let valid = decode(json!({
            "id": 2, "status": "Valid", "progress": "(5/5)",
            "started_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert!(valid.progress.is_none());
    }

    #[test]
    fn error_row_without_summaries_is_rejected() {
        let err = decode(json!({
            "id": 3, "status": "Error", "error_summaries": [],
            "started at": "2024-03-01T10:00:00Z"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("no error summaries"));
    }

    #[test]
    fn valid_row_with_summaries_is_rejected() {
        let err = decode(json!({
            "id": 4, "status": "Valid",
            "error_summaries": [{"Level": 0, "Entity": "Country", "Gaps": 1}],
            "started at": "2024-03-01T10:00:00Z"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Invalid row 4"));
    }

    #[test]
    fn empty_report_path_counts_as_absent() {
        let row = decode(json!({
            "id": 5, "status": "Valid", "error_report": "",
            "started at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert!(row.error_report_path.is_none());
    }

    #[test]
    fn error_row_without_report_decodes() {
        for report in [json!(null), json!("")] {
            let row = decode(json!({
                "id": 6, "status": "Error", "error_report": report,
                "error_summaries": [{"Level": 0, "Entity": "Country", "Gaps": 2}],
                "started at": "2024-03-01T10:00:00Z"
            }))
            .unwrap();
            assert_eq!(row.status, UploadStatus::Error);
            assert!(row.error_report_path.is_none());
        }

        let absent = decode(json!({
            "id": 6, "status": "Error",
            "error_summaries": [{"Level": 0, "Entity": "Country", "Gaps": 2}],
            "started at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();
        assert!(absent.error_report_path.is_none());
    }

    #[test]
    fn report_on_non_error_row_is_rejected() {
        let err = decode(json!({
            "id": 8, "status": "Valid", "error_report": "/media/error_reports/8.csv",
            "started at": "2024-03-01T10:00:00Z"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("error report was attached"));
    }

    #[test]
    fn summary_level_accepts_numeric_string_and_null_counts() {
        let summary: ErrorSummary = serde_json::from_value(json!({
            "Level": "1", "Entity": "Region", "Parent Missing": null, "Duplicated Codes": 2
        }))
        .unwrap();
        assert_eq!(summary.level, 1);
        assert_eq!(summary.count(CheckName::ParentMissing), 0);
        assert_eq!(summary.count(CheckName::DuplicatedCodes), 2);
    }

    #[test]
    fn summary_rejects_negative_count() {
        let result: Result<ErrorSummary, _> =
            serde_json::from_value(json!({"Level": 0, "Entity": "Country", "Gaps": -1}));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_status_is_terminal() {
        let status = UploadStatus::from("Reviewing".to_string());
        assert_matches!(&status, UploadStatus::Other(s) if s == "Reviewing");
        assert!(status.is_terminal());
        assert!(!UploadStatus::Started.is_terminal());
    }

    #[test]
    fn snapshot_finished_detection() {
        let started = decode(json!({"id": 1, "status": "Started", "started at": "2024-03-01T10:00:00Z"})).unwrap();
        let valid = decode(json!({"id": 2, "status": "Valid", "started at": "2024-03-01T10:00:00Z"})).unwrap();

        let pending = UploadSnapshot::new(10, false, vec![started.clone(), valid.clone()]);
        assert!(!pending.all_finished());
        assert_eq!(pending.unfinished_count(), 1);

        let read_only = UploadSnapshot::new(10, true, vec![started]);
        assert!(read_only.all_finished());

        let done = UploadSnapshot::new(10, false, vec![valid]);
        assert!(done.all_finished());
        assert_matches!(done.row(99), Err(CoreError::RowNotFound(99)));
    }
}
