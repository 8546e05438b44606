// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use prescriptions_refresh::config::Config;
use prescriptions_refresh::domain::{NameRegistry, Prescription, PrescriptionPath};
use prescriptions_refresh::handlers::{self, Handler, Services};
use prescriptions_refresh::services::auth::{GitHubCredentials, WarehouseCredentials};
use prescriptions_refresh::services::github::GitHub;
use prescriptions_refresh::services::http::HttpClient;
use prescriptions_refresh::services::pypi::PyPI;
use prescriptions_refresh::services::quay::Quay;
use prescriptions_refresh::services::repository::PrescriptionsRepository;
use prescriptions_refresh::services::warehouse::Warehouse;

/// Config pointing every upstream at `base_url`, with fast retries.
#[allow(dead_code)]
pub fn mock_config(base_url: &str) -> Config {
    Config {
        repo: "https://github.com/thoth-station/prescriptions".into(),
        github_token: Some(SecretString::from("gh-test-token".to_string())),
        github_api_url: base_url.into(),
        github_url: base_url.into(),
        quay_token: Some(SecretString::from("quay-test-token".to_string())),
        quay_url: base_url.into(),
        pypi_url: base_url.into(),
        bigquery_url: base_url.into(),
        bigquery_project: Some("test-project".into()),
        bigquery_access_token: Some(SecretString::from("bq-test-token".to_string())),
        http_max_retries: 2,
        http_retry_initial_ms: 10,
        http_retry_max_ms: 50,
        timeout_secs: 5,
        ..Config::default()
    }
}

#[allow(dead_code)]
pub fn http_client(config: &Config) -> HttpClient {
    HttpClient::new(config, CancellationToken::new()).unwrap()
}

/// Services over a working copy at `root`.
#[allow(dead_code)]
pub fn services(root: &Path, config: Config) -> Arc<Services> {
    let http = http_client(&config);
    let github = GitHub::new(
        http.clone(),
        &config,
        GitHubCredentials::from_config(&config, None).unwrap(),
    );
    let warehouse = Warehouse::new(
        http.clone(),
        &config,
        WarehouseCredentials::from_config(&config).unwrap(),
    );
    Arc::new(Services {
        github,
        quay: Quay::new(http.clone(), &config),
        pypi: PyPI::new(http, &config),
        warehouse,
        repository: PrescriptionsRepository::new(root, &config),
        config: Arc::new(config),
    })
}

/// Run `handler` to completion and collect what it emitted.
#[allow(dead_code)]
pub async fn produce(handler: &dyn Handler) -> Vec<Prescription> {
    let (sink, stream) = handlers::channel(CancellationToken::new());
    let mut names = NameRegistry::new();
    let producer = async move {
        let result = handler.produce(&mut names, &sink).await;
        drop(sink);
        result
    };
    let (result, documents) = tokio::join!(producer, stream.collect::<Vec<_>>());
    result.unwrap();
    documents
}

/// Write a raw document into the working copy.
#[allow(dead_code)]
pub fn write_document(root: &Path, project: &str, file: &str, content: &str) {
    let path = root.join(PrescriptionPath::new(project, file).as_path());
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A `gh_link.yaml` as the gh-link handler writes it.
#[allow(dead_code)]
pub fn gh_link_document(project: &str, link: &str) -> String {
    format!(
        r#"units:
  wraps:
  - name: gh-link.{project}
    type: wrap
    should_include:
      adviser_pipeline: true
    match:
      state:
        resolved_dependencies:
        - name: {project}
    run:
      justification:
      - link: {link}
        message: Package '{project}' is hosted on GitHub
        package_name: {project}
        type: INFO
"#
    )
}

#[allow(dead_code)]
pub fn find<'a>(documents: &'a [Prescription], file: &str) -> Option<&'a Prescription> {
    documents
        .iter()
        .find(|d| d.path.file_name() == Some(file))
}
