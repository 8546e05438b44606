// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Run report pushed to a Prometheus push gateway.
//!
//! Gauges are recorded through the `metrics` facade into a recorder owned by
//! the report, so nothing is installed globally and a run can be rendered on
//! its own.

use std::time::Duration;

use metrics::{describe_gauge, gauge, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use tracing::debug;

use crate::domain::WriteSummary;
use crate::error::Result;
use crate::services::http::{HttpClient, ensure_success};

pub const JOB_NAME: &str = "prescriptions-refresh";

pub const DOCUMENTS: &str = "prescriptions_refresh_documents";
pub const DURATION: &str = "prescriptions_refresh_handler_duration_seconds";
pub const HANDLER_FAILED: &str = "prescriptions_refresh_handler_failed";
pub const SUBMITTED: &str = "prescriptions_refresh_pull_request_submitted";
pub const LAST_RUN: &str = "prescriptions_refresh_last_run_timestamp_seconds";

pub const LABEL_HANDLER: &str = "handler";
pub const LABEL_OUTCOME: &str = "outcome";

fn describe_all() {
    describe_gauge!(DOCUMENTS, "Prescription documents per handler and write outcome");
    describe_gauge!(DURATION, "Wall time spent in a handler");
    describe_gauge!(HANDLER_FAILED, "1 when the handler failed and its output was rolled back");
    describe_gauge!(SUBMITTED, "1 when a pull request was opened or updated");
    describe_gauge!(LAST_RUN, "Unix time the run finished");
}

pub struct RunMetrics {
    recorder: PrometheusRecorder,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        with_local_recorder(&recorder, describe_all);
        Self { recorder }
    }

    pub fn handler_finished(&self, handler: &str, summary: WriteSummary, duration: Duration) {
        with_local_recorder(&self.recorder, || {
            for (outcome, value) in [
                ("created", summary.created),
                ("updated", summary.updated),
                ("removed", summary.removed),
                ("unchanged", summary.unchanged),
            ] {
                gauge!(DOCUMENTS, LABEL_HANDLER => handler.to_string(), LABEL_OUTCOME => outcome)
                    .set(value as f64);
            }
            gauge!(DURATION, LABEL_HANDLER => handler.to_string()).set(duration.as_secs_f64());
            gauge!(HANDLER_FAILED, LABEL_HANDLER => handler.to_string()).set(0.0);
        });
    }

    pub fn handler_failed(&self, handler: &str, duration: Duration) {
        with_local_recorder(&self.recorder, || {
            gauge!(DURATION, LABEL_HANDLER => handler.to_string()).set(duration.as_secs_f64());
            gauge!(HANDLER_FAILED, LABEL_HANDLER => handler.to_string()).set(1.0);
        });
    }

    pub fn submitted(&self, submitted: bool) {
        with_local_recorder(&self.recorder, || {
            gauge!(SUBMITTED).set(if submitted { 1.0 } else { 0.0 });
        });
    }

    /// Prometheus text exposition format, stamped with `now`.
    pub fn render(&self, now: i64) -> String {
        with_local_recorder(&self.recorder, || gauge!(LAST_RUN).set(now as f64));
        self.recorder.handle().render()
    }
}

/// Replace the job's metric group on the gateway.
pub async fn push(
    http: &HttpClient,
    gateway: &str,
    instance: &str,
    metrics: &RunMetrics,
) -> Result<()> {
    let url = format!(
        "{}/metrics/job/{JOB_NAME}/instance/{instance}",
        gateway.trim_end_matches('/')
    );
    let body = metrics.render(chrono::Utc::now().timestamp());

    let response = http
        .send("pushgateway", |c| {
            c.put(&url)
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(body.clone())
        })
        .await?;
    ensure_success("pushgateway", response).await?;
    debug!(url = %url, "metrics pushed");
    Ok(())
}
