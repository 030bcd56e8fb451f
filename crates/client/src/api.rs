//! REST client for the dashboard endpoints used by the upload review step.
//!
//! Wraps the upload status list, ready-to-review, entities list, filter
//! values and notification endpoints using [`reqwest`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use georepo_core::presenter::REPORT_FILE_NAME;
use georepo_core::selection::ImportSelection;
use georepo_core::types::DbId;
use georepo_core::upload::UploadRow;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::entities::{EntitiesFilter, EntityPage, Pagination};
use crate::notifications::NotificationList;

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, or a
    /// body that could not be decoded).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("API error ({status}): {}", status_message(.detail, .body))]
    Status {
        status: u16,
        /// `detail` field of a structured error body, if present.
        detail: Option<String>,
        /// Raw response body for debugging.
        body: String,
    },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A newer request superseded this one before it completed.
    #[error("Request cancelled")]
    Cancelled,
}

impl ApiError {
    /// Structured `detail` message from the server, if there was one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

fn status_message<'a>(detail: &'a Option<String>, body: &'a str) -> &'a str {
    detail.as_deref().unwrap_or(body)
}

/// Response of the entity upload status list.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatusPage {
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub results: Vec<UploadRow>,
}

/// Response of the ready-to-review endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadyToReviewResponse {
    /// Review session created for the submitted rows.
    #[serde(default)]
    pub session_id: Option<DbId>,
}

#[derive(Serialize)]
struct ReadyToReviewRequest {
    upload_entities: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Source of upload status pages.
///
/// The poller depends on this seam rather than on [`GeoRepoApi`] directly.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, session_id: DbId) -> Result<UploadStatusPage, ApiError>;
}

/// Source of pending user notifications.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn fetch_notifications(&self) -> Result<NotificationList, ApiError>;
}

/// HTTP client for the dashboard API.
#[derive(Debug, Clone)]
pub struct GeoRepoApi {
    client: reqwest::Client,
    api_url: String,
}

impl GeoRepoApi {
    /// Build a client from configuration (base URL, token, timeout).
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let value = HeaderValue::from_str(&format!("Token {token}")).map_err(|e| {
                ApiError::InvalidUrl {
                    url: config.api_url.clone(),
                    reason: format!("API token is not a valid header value: {e}"),
                }
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self::with_client(client, config.api_url.clone()))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    ///
    /// * `api_url` - API base URL, e.g. `http://host/api`.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Fetch every row of an upload session.
    ///
    /// Sends `GET /entity-upload-status-list/?id={session}`.
    pub async fn upload_status_list(&self, session_id: DbId) -> Result<UploadStatusPage, ApiError> {
        let response = self
            .client
            .get(format!("{}/entity-upload-status-list/", self.api_url))
            .query(&[("id", session_id)])
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Send the selected rows to review.
    ///
    /// Sends `POST /ready-to-review/` with the ids comma-joined.
    pub async fn ready_to_review(
        &self,
        selection: &ImportSelection,
    ) -> Result<ReadyToReviewResponse, ApiError> {
        let body = ReadyToReviewRequest {
            upload_entities: selection.to_payload(),
        };

        let response = self
            .client
            .post(format!("{}/ready-to-review/", self.api_url))
            .json(&body)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ReadyToReviewResponse::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Download an error report into `dest_dir` as `error_report.csv`.
    ///
    /// `href` is used as given: absolute URLs are fetched directly, paths
    /// are resolved against the API host.
    pub async fn download_report(&self, href: &str, dest_dir: &Path) -> Result<PathBuf, ApiError> {
        let url = self.resolve(href)?;
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;

        let path = dest_dir.join(REPORT_FILE_NAME);
        tokio::fs::create_dir_all(dest_dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Error report saved");
        Ok(path)
    }

    /// Fetch one page of dataset entities.
    ///
    /// Sends `POST /dashboard-dataset/list/{dataset}/{session}/` with the
    /// filter as body and pagination as query parameters.
    pub async fn list_entities(
        &self,
        dataset_id: &str,
        session: &str,
        pagination: &Pagination,
        view_uuid: Option<&str>,
        filter: &EntitiesFilter,
    ) -> Result<EntityPage, ApiError> {
        let mut query = pagination.query_params();
        if let Some(uuid) = view_uuid {
            query.push(("view_uuid", uuid.to_string()));
        }

        let response = self
            .client
            .post(format!(
                "{}/dashboard-dataset/list/{dataset_id}/{session}/",
                self.api_url
            ))
            .query(&query)
            .json(filter)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Distinct values for one filter criteria of a dataset.
    ///
    /// Sends `GET /dashboard-dataset-filter/values/{dataset}/{criteria}/`.
    pub async fn filter_values(
        &self,
        dataset_id: &str,
        criteria: &str,
        view_uuid: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let mut request = self.client.get(format!(
            "{}/dashboard-dataset-filter/values/{dataset_id}/{criteria}/",
            self.api_url
        ));
        if let Some(uuid) = view_uuid {
            request = request.query(&[("view_uuid", uuid)]);
        }

        Self::parse_response(request.send().await?).await
    }

    /// Sends `GET /notification/list/`.
    pub async fn notifications(&self) -> Result<NotificationList, ApiError> {
        let response = self
            .client
            .get(format!("{}/notification/list/", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Resolve a possibly relative href against the API base URL.
    fn resolve(&self, href: &str) -> Result<Url, ApiError> {
        let invalid = |reason: String| ApiError::InvalidUrl {
            url: href.to_string(),
            reason,
        };
        let base = Url::parse(&self.api_url).map_err(|e| invalid(e.to_string()))?;
        base.join(href).map_err(|e| invalid(e.to_string()))
    }

    /// Ensure the response has a success status code. On failure the body
    /// is read and its `detail` field extracted when it is structured.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .map(|b| b.detail);
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl StatusSource for GeoRepoApi {
    async fn fetch_status(&self, session_id: DbId) -> Result<UploadStatusPage, ApiError> {
        self.upload_status_list(session_id).await
    }
}

#[async_trait]
impl NotificationSource for GeoRepoApi {
    async fn fetch_notifications(&self) -> Result<NotificationList, ApiError> {
        self.notifications().await
    }
}
