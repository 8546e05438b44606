// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Analytics warehouse (BigQuery REST API).
//!
//! Queries are parameterized and labelled. Results are read page by page
//! through [`RowCursor`]; each row is decoded against the result schema into
//! a [`Record`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::Config;
use crate::domain::Record;
use crate::error::{Error, Result};
use crate::services::auth::WarehouseCredentials;
use crate::services::http::HttpClient;

const SERVICE: &str = "bigquery";
const POLL_TIMEOUT_MS: &str = "10000";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Polls of an unfinished job before giving up on it.
const MAX_POLLS: u32 = 60;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    name: String,
    parameter_type: Value,
    parameter_value: Value,
}

impl QueryParameter {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_type: json!({ "type": "STRING" }),
            parameter_value: json!({ "value": value.into() }),
        }
    }

    pub fn int64(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            parameter_type: json!({ "type": "INT64" }),
            parameter_value: json!({ "value": value.to_string() }),
        }
    }

    /// `ARRAY<STRING>`, used with `IN UNNEST(@name)`.
    pub fn string_array<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<Value> = values
            .into_iter()
            .map(|v| json!({ "value": v.into() }))
            .collect();
        Self {
            name: name.into(),
            parameter_type: json!({ "type": "ARRAY", "arrayType": { "type": "STRING" } }),
            parameter_value: json!({ "arrayValues": values }),
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "parameterType": self.parameter_type,
            "parameterValue": self.parameter_value,
        })
    }
}

/// A standard SQL query with named parameters and job labels.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub sql: String,
    pub parameters: Vec<QueryParameter>,
    pub labels: BTreeMap<String, String>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, parameter: QueryParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    fn body(&self) -> Value {
        let mut body = json!({
            "query": self.sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": self.parameters.iter().map(QueryParameter::to_value).collect::<Vec<_>>(),
        });
        if !self.labels.is_empty() {
            body["labels"] = json!(self.labels);
        }
        body
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (self.reason.as_deref(), self.message.as_deref()) {
            (Some(reason), Some(message)) => format!("{reason}: {message}"),
            (None, Some(text)) | (Some(text), None) => text.to_string(),
            (None, None) => "query job failed".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
    #[serde(default)]
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Value>,
    #[serde(default)]
    page_token: Option<String>,
}

pub struct Warehouse {
    http: HttpClient,
    base_url: String,
    project: Option<String>,
    credentials: Option<WarehouseCredentials>,
}

impl Warehouse {
    pub fn new(http: HttpClient, config: &Config, credentials: Option<WarehouseCredentials>) -> Self {
        let project = config
            .bigquery_project
            .clone()
            .or_else(|| credentials.as_ref().and_then(|c| c.project_id().map(String::from)));

        Self {
            http,
            base_url: config.bigquery_url.trim_end_matches('/').to_string(),
            project,
            credentials,
        }
    }

    fn project(&self) -> Result<&str> {
        self.project.as_deref().ok_or_else(|| {
            Error::Config(
                "no BigQuery project: set THOTH_PRESCRIPTIONS_REFRESH_BIGQUERY_PROJECT or use a service account key".into(),
            )
        })
    }

    async fn token(&self) -> Result<String> {
        match self.credentials {
            Some(ref credentials) => credentials.access_token(&self.http).await,
            None => Err(Error::MissingCredential {
                handler: "warehouse".into(),
                credential: "BigQuery credentials".into(),
                env: "GOOGLE_APPLICATION_CREDENTIALS".into(),
            }),
        }
    }

    /// Run `query` and wait for it to finish. Rows are fetched lazily
    /// through the returned cursor.
    pub async fn query(&self, query: &Query) -> Result<RowCursor<'_>> {
        let project = self.project()?;
        let token = self.token().await?;
        let url = format!("{}/bigquery/v2/projects/{project}/queries", self.base_url);
        let body = query.body();

        debug!(labels = ?query.labels, "submitting query");
        let mut response: QueryResponse = self
            .http
            .json(SERVICE, |c| c.post(&url).bearer_auth(&token).json(&body))
            .await?;

        job_failure(&response, &url)?;

        let mut polls = 0;
        while !response.job_complete {
            if polls == MAX_POLLS {
                return Err(Error::Upstream {
                    service: SERVICE.into(),
                    url,
                    status: 200,
                    body: format!(
                        "job {} not complete after {MAX_POLLS} polls",
                        response.job_reference.job_id
                    ),
                });
            }
            polls += 1;
            tokio::select! {
                _ = self.http.cancel_token().cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            response = self
                .results(
                    &response.job_reference.job_id,
                    response.job_reference.location.as_deref(),
                    None,
                )
                .await?;
            job_failure(&response, &url)?;
        }

        let fields = response.schema.map(|s| s.fields).unwrap_or_default();
        let first = decode_rows(&fields, response.rows);
        Ok(RowCursor {
            warehouse: self,
            job_id: response.job_reference.job_id,
            location: response.job_reference.location,
            fields,
            first: Some(first),
            page_token: response.page_token,
        })
    }

    async fn results(
        &self,
        job_id: &str,
        location: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let project = self.project()?;
        let token = self.token().await?;
        let url = format!("{}/bigquery/v2/projects/{project}/queries/{job_id}", self.base_url);

        let mut query: Vec<(&str, &str)> = vec![("timeoutMs", POLL_TIMEOUT_MS)];
        if let Some(location) = location {
            query.push(("location", location));
        }
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token));
        }

        self.http
            .json(SERVICE, |c| c.get(&url).bearer_auth(&token).query(&query))
            .await
    }
}

/// Page-by-page access to a finished query's rows.
pub struct RowCursor<'a> {
    warehouse: &'a Warehouse,
    job_id: String,
    location: Option<String>,
    fields: Vec<SchemaField>,
    first: Option<Vec<Record>>,
    page_token: Option<String>,
}

impl RowCursor<'_> {
    /// Next page of rows; `None` once the result set is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>> {
        if let Some(rows) = self.first.take() {
            return Ok(Some(rows));
        }
        let Some(page_token) = self.page_token.take() else {
            return Ok(None);
        };

        let response = self
            .warehouse
            .results(&self.job_id, self.location.as_deref(), Some(&page_token))
            .await?;
        self.page_token = response.page_token.filter(|t| !t.is_empty());
        Ok(Some(decode_rows(&self.fields, response.rows)))
    }

    /// Drain the cursor; for result sets known to be small.
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut rows = Vec::new();
        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }
        Ok(rows)
    }
}

/// A job that reports an error result, or finished without a schema but
/// with errors, failed as a whole.
fn job_failure(response: &QueryResponse, url: &str) -> Result<()> {
    let failure = response
        .status
        .as_ref()
        .and_then(|status| status.error_result.as_ref())
        .or_else(|| {
            (response.job_complete && response.schema.is_none())
                .then(|| response.errors.first())
                .flatten()
        });
    match failure {
        Some(error) => Err(Error::Upstream {
            service: SERVICE.into(),
            url: url.to_string(),
            status: 200,
            body: format!("job {}: {}", response.job_reference.job_id, error.describe()),
        }),
        None => Ok(()),
    }
}

fn decode_rows(fields: &[SchemaField], rows: Vec<Value>) -> Vec<Record> {
    rows.into_iter()
        .filter_map(|row| Record::from_json(decode_struct(fields, &row)))
        .collect()
}

/// `{"f": [{"v": ...}, ...]}` into an object keyed by field name.
fn decode_struct(fields: &[SchemaField], row: &Value) -> Value {
    let cells = row.get("f").and_then(Value::as_array);
    let mut object = Map::new();
    for (idx, field) in fields.iter().enumerate() {
        let cell = cells
            .and_then(|c| c.get(idx))
            .and_then(|c| c.get("v"))
            .unwrap_or(&Value::Null);
        object.insert(field.name.clone(), decode_cell(field, cell));
    }
    Value::Object(object)
}

/// Decode one cell according to its schema field.
pub fn decode_cell(field: &SchemaField, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    if field.mode.as_deref() == Some("REPEATED") {
        let item_field = SchemaField {
            mode: None,
            ..field.clone()
        };
        return Value::Array(
            value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|item| decode_cell(&item_field, item.get("v").unwrap_or(&Value::Null)))
                        .collect()
                })
                .unwrap_or_default(),
        );
    }

    match field.kind.as_str() {
        "RECORD" | "STRUCT" => decode_struct(&field.fields, value),
        "INTEGER" | "INT64" => value
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map_or_else(|| value.clone(), Value::from),
        "FLOAT" | "FLOAT64" => value
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .map_or_else(|| value.clone(), Value::from),
        "BOOLEAN" | "BOOL" => value
            .as_str()
            .map_or_else(|| value.clone(), |s| Value::Bool(s.eq_ignore_ascii_case("true"))),
        _ => value.clone(),
    }
}
