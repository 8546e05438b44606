// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

mod helpers;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prescriptions_refresh::error::Error;
use prescriptions_refresh::domain::WriteSummary;
use prescriptions_refresh::services::http::HttpClient;
use prescriptions_refresh::services::metrics::{self, RunMetrics};

// ─── Retries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rate_limited_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pypi/flask/json"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pypi/flask/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "info": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let http = helpers::http_client(&helpers::mock_config(&server.uri()));
    let url = format!("{}/pypi/flask/json", server.uri());
    let body: Value = http.json("pypi", |c| c.get(&url)).await.unwrap();
    assert_eq!(body, json!({ "info": {} }));
}

#[tokio::test]
async fn exhausted_rate_limit_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let http = helpers::http_client(&helpers::mock_config(&server.uri()));
    let url = format!("{}/repos/o/r", server.uri());
    let err = http.send("github", |c| c.get(&url)).await.unwrap_err();
    match err {
        Error::RetriesExhausted {
            attempts, status, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(status, Some(429));
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_fatal());
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn exhausted_gateway_errors_only_fail_the_item() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let http = helpers::http_client(&helpers::mock_config(&server.uri()));
    let url = format!("{}/api/v1/repository", server.uri());
    let err = http.send("quay", |c| c.get(&url)).await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { status: Some(503), .. }));
    assert!(err.is_item_failure());
    assert!(!err.is_fatal());
}

// ─── Status mapping ──────────────────────────────────────────────────────────

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let http = helpers::http_client(&helpers::mock_config(&server.uri()));
    let url = format!("{}/pypi/flask/json", server.uri());
    let err = http
        .json::<Value, _>("pypi", |c| c.get(&url))
        .await
        .unwrap_err();
    match err {
        Error::Upstream { status, body, .. } => {
            assert_eq!(status, 400);
            assert_eq!(body, "bad request");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn not_found_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let http = helpers::http_client(&helpers::mock_config(&server.uri()));
    let url = format!("{}/pypi/missing/json", server.uri());
    let body: Option<Value> = http.json_opt("pypi", |c| c.get(&url)).await.unwrap();
    assert!(body.is_none());
    let page = http.text_opt("pypi", |c| c.get(&url)).await.unwrap();
    assert!(page.is_none());
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_report_replaces_the_job_group() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/metrics/job/prescriptions-refresh/instance/ocp4-stage"))
        .and(header("Content-Type", "text/plain; version=0.0.4"))
        .and(body_string_contains(
            "prescriptions_refresh_documents{handler=\"gh-forked\",outcome=\"updated\"} 3",
        ))
        .and(body_string_contains("prescriptions_refresh_pull_request_submitted 0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let report = RunMetrics::new();
    report.handler_finished(
        "gh-forked",
        WriteSummary {
            updated: 3,
            ..WriteSummary::default()
        },
        std::time::Duration::from_secs(2),
    );
    report.submitted(false);

    let http = helpers::http_client(&helpers::mock_config(&server.uri()));
    let gateway = format!("{}/", server.uri());
    metrics::push(&http, &gateway, "ocp4-stage", &report)
        .await
        .unwrap();
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_client_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let http = HttpClient::new(&helpers::mock_config(&server.uri()), cancel.clone()).unwrap();
    cancel.cancel();
    let url = format!("{}/anything", server.uri());
    let err = http.send("pypi", |c| c.get(&url)).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(err.exit_code(), 0);
}
