//! Server-side paginated query over a dataset's entities.
//!
//! [`EntitiesTable`] keeps at most one list request outstanding: issuing
//! a new fetch cancels the previous one through its
//! [`CancellationToken`]. Filter values for the column dropdowns are
//! fetched concurrently once and cached. Free-text search goes through a
//! [`SearchDebouncer`] so only the text typed last reaches the filter.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, GeoRepoApi};

/// Default number of rows per page.
pub const DEFAULT_ROWS_PER_PAGE: u32 = 10;

/// Quiet time after the last keystroke before a search is applied.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Criteria with a dropdown of distinct values.
const FILTER_VALUE_CRITERIA: [&str; 6] =
    ["country", "level", "level_name", "type", "revision", "status"];

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub name: String,
    pub direction: SortDirection,
}

/// Table paging state. `page` is zero-based; the API expects one-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub rows_per_page: u32,
    pub sort: Option<SortOrder>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            rows_per_page: DEFAULT_ROWS_PER_PAGE,
            sort: None,
        }
    }
}

impl Pagination {
    pub fn change_page(&mut self, page: u32) {
        self.page = page;
    }

    /// Changing the sort order returns to the first page.
    pub fn sort_by(&mut self, name: impl Into<String>, direction: SortDirection) {
        self.page = 0;
        self.sort = Some(SortOrder {
            name: name.into(),
            direction,
        });
    }

    /// Changing the page size returns to the first page.
    pub fn change_rows_per_page(&mut self, rows_per_page: u32) {
        self.page = 0;
        self.rows_per_page = rows_per_page.max(1);
    }

    /// Query parameters in the order the list endpoint documents them.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let (sort_by, sort_direction) = match &self.sort {
            Some(sort) => (sort.name.clone(), sort.direction.as_str().to_string()),
            None => (String::new(), String::new()),
        };
        vec![
            ("page", (self.page + 1).to_string()),
            ("page_size", self.rows_per_page.to_string()),
            ("sort_by", sort_by),
            ("sort_direction", sort_direction),
        ]
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Kind of value a filter update carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    StringArray,
    StringSearch,
    DateRange,
}

/// A change to one filter criteria coming from the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterUpdate {
    pub criteria: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
}

impl FilterUpdate {
    /// Free-text search update.
    pub fn search(text: &str) -> Self {
        Self {
            criteria: "search_text".into(),
            filter_type: FilterType::StringSearch,
            values: vec![text.to_string()],
            date_from: None,
            date_to: None,
        }
    }

    /// Clears the validity date filter.
    pub fn clear_valid_on() -> Self {
        Self {
            criteria: "valid_on".into(),
            filter_type: FilterType::DateRange,
            values: Vec::new(),
            date_from: None,
            date_to: None,
        }
    }
}

/// Filter criteria posted as the body of the entities list request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitiesFilter {
    #[serde(default)]
    pub country: Vec<String>,
    #[serde(default)]
    pub level: Vec<String>,
    #[serde(default)]
    pub level_name: Vec<String>,
    #[serde(default, rename = "type")]
    pub entity_type: Vec<String>,
    #[serde(default)]
    pub revision: Vec<String>,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub points: Vec<String>,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub search_text: Option<String>,
}

impl EntitiesFilter {
    /// Apply one update. Unknown criteria are ignored and reported.
    pub fn apply(&mut self, update: &FilterUpdate) -> bool {
        let values = update.values.clone();
        match update.criteria.as_str() {
            "country" => self.country = values,
            "level" => self.level = values,
            "level_name" => self.level_name = values,
            "type" => self.entity_type = values,
            "revision" => self.revision = values,
            "status" => self.status = values,
            "points" => self.points = values,
            "valid_on" => self.valid_from = update.date_from.clone(),
            "search_text" => {
                self.search_text = values.into_iter().next().filter(|text| !text.is_empty())
            }
            other => {
                tracing::debug!(criteria = other, "Ignoring update for unknown filter criteria");
                return false;
            }
        }
        true
    }

    pub fn apply_all<'a>(&mut self, updates: impl IntoIterator<Item = &'a FilterUpdate>) {
        for update in updates {
            self.apply(update);
        }
    }

    /// Values currently selected for a table column's dropdown.
    ///
    /// Columns without a dropdown (`id`, `updated`, the codes) have none.
    pub fn values_for_column(&self, column: &str) -> &[String] {
        match column {
            "country" => &self.country,
            "level" => &self.level,
            "type" => &self.entity_type,
            "name" => &self.level_name,
            "rev" => &self.revision,
            "status" => &self.status,
            "centroid" => &self.points,
            _ => &[],
        }
    }
}

/// Map a table column to the filter criteria it drives.
pub fn criteria_for_column(column: &str) -> &str {
    match column {
        "name" => "level_name",
        "rev" => "revision",
        "updated" => "valid_on",
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Search debounce
// ---------------------------------------------------------------------------

/// Coalesces search keystrokes into one [`FilterUpdate`] per pause.
///
/// Every [`update`](Self::update) re-arms the timer; the update is emitted
/// once no new text has arrived for the debounce delay.
pub struct SearchDebouncer {
    input: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SearchDebouncer {
    /// Spawn the debounce task. Debounced updates arrive on the receiver.
    pub fn spawn(delay: Duration) -> (Self, mpsc::UnboundedReceiver<FilterUpdate>) {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (output, output_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(debounce(delay, input_rx, output, cancel.clone()));
        (
            Self {
                input,
                cancel,
                handle,
            },
            output_rx,
        )
    }

    /// Record the current search text.
    pub fn update(&self, text: impl Into<String>) {
        if self.input.send(text.into()).is_err() {
            tracing::debug!("Search debouncer stopped, dropping search text");
        }
    }

    /// Stop the task. Text still waiting for the delay is discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn debounce(
    delay: Duration,
    mut input: mpsc::UnboundedReceiver<String>,
    output: mpsc::UnboundedSender<FilterUpdate>,
    cancel: CancellationToken,
) {
    let mut pending: Option<String> = None;
    let timer = tokio::time::sleep(delay);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            text = input.recv() => match text {
                Some(text) => {
                    pending = Some(text);
                    timer.as_mut().reset(Instant::now() + delay);
                }
                None => break,
            },
            _ = &mut timer, if pending.is_some() => {
                if let Some(text) = pending.take() {
                    tracing::debug!(search_text = %text, "Search text settled");
                    if output.send(FilterUpdate::search(&text)).is_err() {
                        break;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One entity row in the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: i64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default, rename = "type")]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub default_code: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub concept_ucode: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub rev: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub centroid: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPage {
    pub count: u64,
    pub results: Vec<EntityRow>,
}

/// Distinct values per filterable column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterValues {
    pub country: Vec<serde_json::Value>,
    pub level: Vec<serde_json::Value>,
    pub name: Vec<serde_json::Value>,
    #[serde(rename = "type")]
    pub entity_type: Vec<serde_json::Value>,
    pub rev: Vec<serde_json::Value>,
    pub status: Vec<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// EntitiesTable
// ---------------------------------------------------------------------------

/// Query engine behind one entities table.
pub struct EntitiesTable {
    api: Arc<GeoRepoApi>,
    dataset_id: String,
    session: String,
    view_uuid: Option<String>,
    in_flight: Mutex<Option<CancellationToken>>,
    filter_values: OnceCell<FilterValues>,
}

impl EntitiesTable {
    pub fn new(
        api: Arc<GeoRepoApi>,
        dataset_id: impl Into<String>,
        session: impl Into<String>,
        view_uuid: Option<String>,
    ) -> Self {
        Self {
            api,
            dataset_id: dataset_id.into(),
            session: session.into(),
            view_uuid,
            in_flight: Mutex::new(None),
            filter_values: OnceCell::new(),
        }
    }

    /// Fetch one page, cancelling any request still in flight.
    ///
    /// Returns [`ApiError::Cancelled`] if a later call supersedes this one.
    pub async fn fetch(
        &self,
        pagination: &Pagination,
        filter: &EntitiesFilter,
    ) -> Result<EntityPage, ApiError> {
        let token = self.replace_token();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ApiError::Cancelled),
            result = self.api.list_entities(
                &self.dataset_id,
                &self.session,
                pagination,
                self.view_uuid.as_deref(),
                filter,
            ) => result,
        };

        match &result {
            Ok(page) => tracing::debug!(
                dataset_id = %self.dataset_id,
                page = pagination.page,
                count = page.count,
                "Entities page loaded",
            ),
            Err(ApiError::Cancelled) => tracing::debug!(
                dataset_id = %self.dataset_id,
                "Entities request superseded",
            ),
            Err(e) => tracing::warn!(
                dataset_id = %self.dataset_id,
                error = %e,
                "Entities request failed",
            ),
        }
        result
    }

    /// Cancel the outstanding request, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.lock_in_flight().take() {
            token.cancel();
        }
    }

    /// Distinct filter values, fetched concurrently on first use.
    pub async fn filter_values(&self) -> Result<&FilterValues, ApiError> {
        self.filter_values
            .get_or_try_init(|| async {
                let view_uuid = self.view_uuid.as_deref();
                let requests = FILTER_VALUE_CRITERIA
                    .iter()
                    .map(|criteria| self.api.filter_values(&self.dataset_id, criteria, view_uuid));
                let mut results = futures::future::try_join_all(requests).await?.into_iter();
                let mut next = || results.next().unwrap_or_default();

                Ok::<_, ApiError>(FilterValues {
                    country: next(),
                    level: next(),
                    name: next(),
                    entity_type: next(),
                    rev: next(),
                    status: next(),
                })
            })
            .await
    }

    fn replace_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock_in_flight().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_are_one_based() {
        let mut pagination = Pagination::default();
        pagination.change_page(2);
        let params = pagination.query_params();
        assert_eq!(params[0], ("page", "3".to_string()));
        assert_eq!(params[1], ("page_size", "10".to_string()));
        assert_eq!(params[2], ("sort_by", String::new()));
    }

    #[test]
    fn sorting_and_resizing_reset_to_first_page() {
        let mut pagination = Pagination::default();
        pagination.change_page(4);
        pagination.sort_by("name", SortDirection::Desc);
        assert_eq!(pagination.page, 0);
        assert_eq!(pagination.query_params()[3], ("sort_direction", "desc".to_string()));

        pagination.change_page(4);
        pagination.change_rows_per_page(50);
        assert_eq!(pagination.page, 0);
        assert_eq!(pagination.rows_per_page, 50);
    }

    #[test]
    fn filter_updates_replace_criteria_values() {
        let mut filter = EntitiesFilter::default();
        filter.apply_all(&[
            FilterUpdate {
                criteria: criteria_for_column("name").into(),
                filter_type: FilterType::StringArray,
                values: vec!["Province".into()],
                date_from: None,
                date_to: None,
            },
            FilterUpdate {
                criteria: criteria_for_column("updated").into(),
                filter_type: FilterType::DateRange,
                values: Vec::new(),
                date_from: Some("2023-01-01".into()),
                date_to: None,
            },
            FilterUpdate::search("Lilongwe"),
        ]);

        assert_eq!(filter.level_name, vec!["Province"]);
        assert_eq!(filter.valid_from.as_deref(), Some("2023-01-01"));
        assert_eq!(filter.search_text.as_deref(), Some("Lilongwe"));

        filter.apply(&FilterUpdate::search(""));
        filter.apply(&FilterUpdate::clear_valid_on());
        assert!(filter.search_text.is_none());
        assert!(filter.valid_from.is_none());
    }

    #[test]
    fn unknown_criteria_is_ignored() {
        let mut filter = EntitiesFilter::default();
        let applied = filter.apply(&FilterUpdate {
            criteria: "colour".into(),
            filter_type: FilterType::StringArray,
            values: vec!["red".into()],
            date_from: None,
            date_to: None,
        });
        assert!(!applied);
        assert_eq!(filter, EntitiesFilter::default());
    }

    #[test]
    fn column_values_follow_renamed_criteria() {
        let mut filter = EntitiesFilter::default();
        filter.apply_all(&[
            FilterUpdate {
                criteria: criteria_for_column("name").into(),
                filter_type: FilterType::StringArray,
                values: vec!["District".into()],
                date_from: None,
                date_to: None,
            },
            FilterUpdate {
                criteria: criteria_for_column("rev").into(),
                filter_type: FilterType::StringArray,
                values: vec!["3".into()],
                date_from: None,
                date_to: None,
            },
            FilterUpdate {
                criteria: "points".into(),
                filter_type: FilterType::StringArray,
                values: vec!["33.7,-13.9".into()],
                date_from: None,
                date_to: None,
            },
        ]);

        assert_eq!(filter.values_for_column("name"), ["District"]);
        assert_eq!(filter.values_for_column("rev"), ["3"]);
        assert_eq!(filter.values_for_column("centroid"), ["33.7,-13.9"]);
        assert!(filter.values_for_column("country").is_empty());
        assert!(filter.values_for_column("updated").is_empty());
        assert!(filter.values_for_column("id").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn search_emits_only_the_last_text_after_quiet_time() {
        let (debouncer, mut updates) = SearchDebouncer::spawn(SEARCH_DEBOUNCE);

        debouncer.update("L");
        tokio::time::sleep(Duration::from_millis(200)).await;
        debouncer.update("Li");
        tokio::time::sleep(Duration::from_millis(400)).await;
        debouncer.update("Lil");
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(updates.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(updates.recv().await.unwrap(), FilterUpdate::search("Lil"));
        assert!(updates.try_recv().is_err());

        debouncer.update("Lilongwe");
        tokio::time::sleep(SEARCH_DEBOUNCE * 2).await;
        assert_eq!(updates.recv().await.unwrap(), FilterUpdate::search("Lilongwe"));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_debouncer_discards_pending_text() {
        let (debouncer, mut updates) = SearchDebouncer::spawn(SEARCH_DEBOUNCE);
        debouncer.update("Lilongwe");
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.stop();

        tokio::time::sleep(SEARCH_DEBOUNCE * 2).await;
        assert!(updates.recv().await.is_none());
    }

    #[test]
    fn filter_serializes_type_key() {
        let filter = EntitiesFilter {
            entity_type: vec!["Country".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["type"], serde_json::json!(["Country"]));
    }
}
