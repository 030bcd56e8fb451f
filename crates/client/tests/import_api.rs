mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use georepo_client::api::UploadStatusPage;
use georepo_client::import::{ImportGate, ReviewDestination, SubmitError, GENERIC_IMPORT_ERROR};
use georepo_client::poll_interval::{PollInterval, FETCH_INTERVAL_JOB, FETCH_INTERVAL_NORMAL};
use georepo_core::selection::SelectionContext;
use georepo_core::upload::UploadSnapshot;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{api_for, error_row_json, row_json, status_page};

/// Gate over a finished session: rows 4, 9 and 11 are importable, row 12
/// has blocking errors.
fn gate(server: &MockServer, interval: PollInterval, read_only: bool, privileged: bool) -> ImportGate {
    let mut blocked = error_row_json(12);
    blocked["is_importable"] = json!(false);
    let page: UploadStatusPage = serde_json::from_value(status_page(
        read_only,
        vec![row_json(4, "Valid"), row_json(9, "Valid"), row_json(11, "Valid"), blocked],
    ))
    .unwrap();

    let snapshot = Arc::new(UploadSnapshot::new(8, page.is_read_only, page.results));
    let ctx = SelectionContext::from_snapshot(&snapshot);
    let mut gate = ImportGate::new(api_for(server), interval, privileged);
    gate.rows_changed(snapshot, ctx);
    gate
}

async fn mount_review(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/ready-to-review/"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn submit_posts_comma_joined_ids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ready-to-review/"))
        .and(body_json(json!({"upload_entities": "4,9,11"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": 31})))
        .expect(1)
        .mount(&server)
        .await;

    let interval = PollInterval::default();
    let mut gate = gate(&server, interval.clone(), false, false);
    gate.selection_changed([4, 9, 11]);

    let destination = gate.submit().await.unwrap();
    assert_eq!(destination, ReviewDestination::Listing);
    assert_eq!(interval.get(), FETCH_INTERVAL_JOB);
}

#[tokio::test]
async fn privileged_caller_opens_created_session() {
    let server = MockServer::start().await;
    mount_review(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"session_id": 31})),
    )
    .await;

    let mut gate = gate(&server, PollInterval::default(), false, true);
    gate.selection_changed([4]);

    let destination = gate.submit().await.unwrap();
    assert_eq!(destination, ReviewDestination::Session(31));
    assert_eq!(destination.path(), "/review_list?upload=31");
}

#[tokio::test]
async fn privileged_caller_without_session_goes_to_listing() {
    let server = MockServer::start().await;
    mount_review(&server, ResponseTemplate::new(200)).await;

    let mut gate = gate(&server, PollInterval::default(), false, true);
    gate.selection_changed([4]);

    assert_eq!(gate.submit().await.unwrap(), ReviewDestination::Listing);
}

#[tokio::test]
async fn structured_rejection_shows_server_detail() {
    let server = MockServer::start().await;
    mount_review(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({"detail": "Entity 4 is locked"})),
    )
    .await;

    let interval = PollInterval::default();
    let mut gate = gate(&server, interval.clone(), false, false);
    gate.selection_changed([4]);

    let err = gate.submit().await.unwrap_err();
    assert_matches!(&err, SubmitError::Detail(detail) if detail == "Entity 4 is locked");
    assert_eq!(err.user_message(), "Entity 4 is locked");
    assert_eq!(interval.get(), FETCH_INTERVAL_NORMAL);
}

#[tokio::test]
async fn unstructured_failure_shows_generic_alert() {
    let server = MockServer::start().await;
    mount_review(&server, ResponseTemplate::new(502).set_body_string("Bad Gateway")).await;

    let mut gate = gate(&server, PollInterval::default(), false, false);
    gate.selection_changed([4]);

    let err = gate.submit().await.unwrap_err();
    assert_matches!(err, SubmitError::Generic(_));
    assert_eq!(err.user_message(), GENERIC_IMPORT_ERROR);
}

#[tokio::test]
async fn refused_submits_send_nothing() {
    let server = MockServer::start().await;
    mount_review(&server, ResponseTemplate::new(200)).await;

    let empty = gate(&server, PollInterval::default(), false, false);
    assert_matches!(empty.submit().await, Err(SubmitError::EmptySelection));

    let mut read_only = gate(&server, PollInterval::default(), true, false);
    read_only.selection_changed([4]);
    assert_matches!(read_only.submit().await, Err(SubmitError::ReadOnly));

    let mut blocked = gate(&server, PollInterval::default(), false, false);
    blocked.selection_changed([12]);
    assert!(!blocked.can_submit());
    assert_matches!(blocked.submit().await, Err(SubmitError::EmptySelection));

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn blocked_row_is_left_out_of_the_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ready-to-review/"))
        .and(body_json(json!({"upload_entities": "4,11"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut gate = gate(&server, PollInterval::default(), false, false);
    assert_eq!(gate.selection_changed([4, 12, 11]), vec![12]);
    gate.submit().await.unwrap();
}

#[tokio::test]
async fn blank_detail_falls_back_to_generic_alert() {
    let server = MockServer::start().await;
    mount_review(
        &server,
        ResponseTemplate::new(400).set_body_json(json!({"detail": ""})),
    )
    .await;

    let mut gate = gate(&server, PollInterval::default(), false, false);
    gate.selection_changed([4]);

    let err = gate.submit().await.unwrap_err();
    assert_matches!(err, SubmitError::Generic(_));
    assert_eq!(err.user_message(), GENERIC_IMPORT_ERROR);
}
