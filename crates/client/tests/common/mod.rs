#![allow(dead_code)]

use std::sync::Arc;

use georepo_client::api::GeoRepoApi;
use serde_json::{json, Value};
use wiremock::MockServer;

/// Build an API client pointed at the mock server's `/api` prefix.
pub fn api_for(server: &MockServer) -> Arc<GeoRepoApi> {
    Arc::new(GeoRepoApi::with_client(
        reqwest::Client::new(),
        format!("{}/api", server.uri()),
    ))
}

/// A status row as the server returns it.
pub fn row_json(id: i64, status: &str) -> Value {
    let mut row = json!({
        "id": id,
        "status": status,
        "progress": "",
        "is_importable": true,
        "is_warning": false,
        "error_summaries": null,
        "error_report": "",
        "started at": "2023-05-04T10:15:00Z",
    });
    if status == "Processing" {
        row["progress"] = json!("2/5");
    }
    row
}

/// An errored row with one overlap finding and a report.
pub fn error_row_json(id: i64) -> Value {
    let mut row = row_json(id, "Error");
    row["error_summaries"] = json!([{
        "Level": "0",
        "Entity": "Malawi",
        "Overlaps": 2,
        "Gaps": 1,
        "Duplicate Nodes": 0,
    }]);
    row["error_report"] = json!("/media/error_reports/12.csv");
    row
}

pub fn status_page(read_only: bool, rows: Vec<Value>) -> Value {
    json!({
        "is_read_only": read_only,
        "results": rows,
    })
}
