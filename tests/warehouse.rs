// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

mod helpers;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prescriptions_refresh::error::Error;
use prescriptions_refresh::services::warehouse::Query;

const QUERIES: &str = "/bigquery/v2/projects/test-project/queries";

// ─── Jobs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unfinished_job_is_polled_until_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERIES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": false,
            "jobReference": { "jobId": "job-1", "location": "US" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{QUERIES}/job-1")))
        .and(query_param("location", "US"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "jobReference": { "jobId": "job-1", "location": "US" },
            "schema": { "fields": [{ "name": "project", "type": "STRING" }] },
            "rows": [{ "f": [{ "v": "flask" }] }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let services = helpers::services(dir.path(), helpers::mock_config(&server.uri()));
    let rows = services
        .warehouse
        .query(&Query::new("SELECT project FROM downloads"))
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].str("project"), Some("flask"));
}

#[tokio::test]
async fn failed_job_is_an_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERIES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "jobReference": { "jobId": "job-2" },
            "status": {
                "errorResult": { "reason": "invalidQuery", "message": "Unrecognized name: projct" }
            }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let services = helpers::services(dir.path(), helpers::mock_config(&server.uri()));
    let err = services
        .warehouse
        .query(&Query::new("SELECT projct FROM downloads"))
        .await
        .err()
        .unwrap();
    match err {
        Error::Upstream { ref body, .. } => {
            assert!(body.contains("invalidQuery: Unrecognized name: projct"));
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_item_failure());
}

#[tokio::test]
async fn errors_without_a_schema_fail_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(QUERIES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobComplete": true,
            "jobReference": { "jobId": "job-3" },
            "errors": [{ "reason": "resourcesExceeded", "message": "Resources exceeded" }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let services = helpers::services(dir.path(), helpers::mock_config(&server.uri()));
    let result = services
        .warehouse
        .query(&Query::new("SELECT 1"))
        .await;
    assert!(matches!(result, Err(Error::Upstream { .. })));
}
