// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::handlers::{Credential, HandlerKind};

pub const ENV_PREFIX: &str = "THOTH_PRESCRIPTIONS_REFRESH_";

pub const DEFAULT_PRESCRIPTIONS_REPO: &str = "git@github.com:thoth-station/prescriptions.git";

/// Variables kept from the job's historical environment that do not carry
/// the common prefix.
const UNPREFIXED_ENV: &[(&str, &str)] = &[
    ("GITHUB_APP_ID", "github_app_id"),
    ("GITHUB_PRIVATE_KEY_PATH", "github_private_key_path"),
    ("GOOGLE_APPLICATION_CREDENTIALS", "google_application_credentials"),
    ("THOTH_DEPLOYMENT_NAME", "deployment_name"),
    ("THOTH_PRESCRIPTIONS_DRY_RUN", "dry_run"),
    ("THOTH_PRESCRIPTIONS_PYPI_RELEASE_DAYS", "pypi_release_days"),
    ("PROMETHEUS_PUSHGATEWAY_URL", "metrics_pushgateway_url"),
];

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Git URL of the prescriptions repository pull requests are opened against
    #[serde(default = "default_repo")]
    pub repo: String,

    /// Comma separated labels added to the pull request
    #[serde(default = "default_labels")]
    pub github_labels: String,

    /// Comma separated handlers run when `run` gets no arguments
    #[serde(default)]
    pub handlers: String,

    /// Existing clone to work in instead of a fresh shallow clone
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    #[serde(default, deserialize_with = "figment::util::bool_from_str_or_int")]
    pub dry_run: bool,

    #[serde(default, deserialize_with = "figment::util::bool_from_str_or_int")]
    pub randomize: bool,

    #[serde(default, deserialize_with = "figment::util::bool_from_str_or_int")]
    pub debug: bool,

    #[serde(default)]
    pub deployment_name: Option<String>,

    // GitHub
    /// Token pool, comma or newline separated; one is picked per request
    #[serde(default, skip_serializing)]
    pub github_token: Option<SecretString>,

    #[serde(default)]
    pub github_app_id: Option<u64>,

    #[serde(default)]
    pub github_private_key_path: Option<PathBuf>,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    #[serde(default = "default_github_url")]
    pub github_url: String,

    // Quay
    #[serde(default, skip_serializing)]
    pub quay_token: Option<SecretString>,

    /// Registry host, optionally with a scheme for non-TLS registries
    #[serde(default = "default_quay_url")]
    pub quay_url: String,

    #[serde(default = "default_quay_namespace")]
    pub quay_ps_namespace_name: String,

    #[serde(
        default = "default_true",
        deserialize_with = "figment::util::bool_from_str_or_int"
    )]
    pub quay_ps_namespace_public: bool,

    /// Extra images to inspect, one per line, `#` starts a comment
    #[serde(default)]
    pub configured_images: String,

    // PyPI
    #[serde(default = "default_pypi_url")]
    pub pypi_url: String,

    // BigQuery
    #[serde(default)]
    pub google_application_credentials: Option<PathBuf>,

    #[serde(default = "default_bigquery_url")]
    pub bigquery_url: String,

    /// Project billed for queries; defaults to the service account's project
    #[serde(default)]
    pub bigquery_project: Option<String>,

    /// Pre-minted OAuth token, takes precedence over the service account
    #[serde(default, skip_serializing)]
    pub bigquery_access_token: Option<SecretString>,

    // Representative package lists, one package per line
    #[serde(default)]
    pub ml_packages: String,

    #[serde(default)]
    pub nlp_packages: String,

    #[serde(default)]
    pub cv_packages: String,

    // Thresholds
    #[serde(default = "default_scorecard_freshness_weeks")]
    pub scorecard_freshness_weeks: u32,

    #[serde(default = "default_popularity_low")]
    pub pypi_popularity_low: u64,

    #[serde(default = "default_popularity_moderate")]
    pub pypi_popularity_moderate: u64,

    #[serde(default = "default_popularity_high")]
    pub pypi_popularity_high: u64,

    #[serde(default = "default_pypi_downloads_time_interval")]
    pub pypi_downloads_time_interval: u32,

    #[serde(default = "default_maintainers_count")]
    pub pypi_project_maintainers_count: usize,

    #[serde(default = "default_maintainers_count")]
    pub pypi_maintainer_projects_count: usize,

    #[serde(default = "default_maintainer_joined_age_days")]
    pub pypi_maintainer_joined_age_days: i64,

    /// Releases whose largest artifact reaches this many bytes are reported
    #[serde(default = "default_pypi_artifact_report_size")]
    pub pypi_artifact_report_size: u64,

    #[serde(default = "default_pypi_release_days")]
    pub pypi_release_days: i64,

    #[serde(default = "default_popularity_low")]
    pub gh_popularity_low: u64,

    #[serde(default = "default_popularity_moderate")]
    pub gh_popularity_moderate: u64,

    #[serde(default = "default_popularity_high")]
    pub gh_popularity_high: u64,

    #[serde(default = "default_gh_updated_days")]
    pub gh_updated_days: i64,

    #[serde(default = "default_gh_contributors_count")]
    pub gh_contributors_count: usize,

    // HTTP
    /// Request timeout in seconds (default 60)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_http_max_retries")]
    pub http_max_retries: u32,

    #[serde(default = "default_http_retry_initial_ms")]
    pub http_retry_initial_ms: u64,

    #[serde(default = "default_http_retry_max_ms")]
    pub http_retry_max_ms: u64,

    // Git
    #[serde(default = "default_git_author_name")]
    pub git_author_name: String,

    #[serde(default = "default_git_author_email")]
    pub git_author_email: String,

    #[serde(default)]
    pub metrics_pushgateway_url: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_repo() -> String {
    DEFAULT_PRESCRIPTIONS_REPO.into()
}
fn default_labels() -> String {
    "bot".into()
}
fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_github_url() -> String {
    "https://github.com".into()
}
fn default_quay_url() -> String {
    "quay.io".into()
}
fn default_quay_namespace() -> String {
    "thoth-station".into()
}
fn default_pypi_url() -> String {
    "https://pypi.org".into()
}
fn default_bigquery_url() -> String {
    "https://bigquery.googleapis.com".into()
}
fn default_scorecard_freshness_weeks() -> u32 {
    2
}
fn default_popularity_low() -> u64 {
    20
}
fn default_popularity_moderate() -> u64 {
    100
}
fn default_popularity_high() -> u64 {
    1000
}
fn default_pypi_downloads_time_interval() -> u32 {
    180
}
fn default_maintainers_count() -> usize {
    3
}
fn default_maintainer_joined_age_days() -> i64 {
    180
}
fn default_pypi_artifact_report_size() -> u64 {
    3 * 1024 * 1024
}
fn default_pypi_release_days() -> i64 {
    180
}
fn default_gh_updated_days() -> i64 {
    365
}
fn default_gh_contributors_count() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_http_max_retries() -> u32 {
    5
}
fn default_http_retry_initial_ms() -> u64 {
    1_000
}
fn default_http_retry_max_ms() -> u64 {
    60_000
}
fn default_git_author_name() -> String {
    "Thoth Prescriptions Refresh".into()
}
fn default_git_author_email() -> String {
    "prescriptions-refresh@thoth-station.ninja".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            github_labels: default_labels(),
            handlers: String::new(),
            workdir: None,
            dry_run: false,
            randomize: false,
            debug: false,
            deployment_name: None,
            github_token: None,
            github_app_id: None,
            github_private_key_path: None,
            github_api_url: default_github_api_url(),
            github_url: default_github_url(),
            quay_token: None,
            quay_url: default_quay_url(),
            quay_ps_namespace_name: default_quay_namespace(),
            quay_ps_namespace_public: true,
            configured_images: String::new(),
            pypi_url: default_pypi_url(),
            google_application_credentials: None,
            bigquery_url: default_bigquery_url(),
            bigquery_project: None,
            bigquery_access_token: None,
            ml_packages: String::new(),
            nlp_packages: String::new(),
            cv_packages: String::new(),
            scorecard_freshness_weeks: default_scorecard_freshness_weeks(),
            pypi_popularity_low: default_popularity_low(),
            pypi_popularity_moderate: default_popularity_moderate(),
            pypi_popularity_high: default_popularity_high(),
            pypi_downloads_time_interval: default_pypi_downloads_time_interval(),
            pypi_project_maintainers_count: default_maintainers_count(),
            pypi_maintainer_projects_count: default_maintainers_count(),
            pypi_maintainer_joined_age_days: default_maintainer_joined_age_days(),
            pypi_artifact_report_size: default_pypi_artifact_report_size(),
            pypi_release_days: default_pypi_release_days(),
            gh_popularity_low: default_popularity_low(),
            gh_popularity_moderate: default_popularity_moderate(),
            gh_popularity_high: default_popularity_high(),
            gh_updated_days: default_gh_updated_days(),
            gh_contributors_count: default_gh_contributors_count(),
            timeout_secs: default_timeout_secs(),
            http_max_retries: default_http_max_retries(),
            http_retry_initial_ms: default_http_retry_initial_ms(),
            http_retry_max_ms: default_http_retry_max_ms(),
            git_author_name: default_git_author_name(),
            git_author_email: default_git_author_email(),
            metrics_pushgateway_url: None,
        }
    }
}

/// Split a multi-line setting into entries, skipping blanks and `#` comments.
pub fn configured_parameters(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load with priority: CLI > ENV > explicit/user config > project config > defaults
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Project-level config in the working directory
        if let Ok(cwd) = std::env::current_dir() {
            let project_config = cwd.join("prescriptions-refresh.toml");
            if project_config.exists() {
                figment = figment.merge(Toml::file(&project_config));
            }
        }

        // User-level config, or the file passed with --config
        match &cli.config {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                if let Some(path) = Self::config_path()
                    && path.exists()
                {
                    figment = figment.merge(Toml::file(&path));
                }
            }
        }

        figment = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Env::raw().filter_map(|key| {
                UNPREFIXED_ENV
                    .iter()
                    .find(|(env, _)| key.as_str().eq_ignore_ascii_case(env))
                    .map(|(_, field)| (*field).into())
            }));

        let mut config: Config = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // CLI overrides (highest priority)
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "thoth-station", "prescriptions-refresh")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if cli.verbose {
            self.debug = true;
        }
        if cli.dry_run {
            self.dry_run = true;
        }
        if cli.randomize {
            self.randomize = true;
        }
        if let Some(ref repo) = cli.prescriptions_repo {
            self.repo = repo.clone();
        }
        if let Some(ref labels) = cli.labels {
            self.github_labels = labels.clone();
        }
        if let Some(ref workdir) = cli.workdir {
            self.workdir = Some(workdir.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.repo.trim().is_empty() {
            return Err(Error::Config("repo cannot be empty".into()));
        }

        for (name, value) in [
            ("github_api_url", &self.github_api_url),
            ("github_url", &self.github_url),
            ("pypi_url", &self.pypi_url),
            ("bigquery_url", &self.bigquery_url),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(Error::Config(format!(
                    "{name} must start with http:// or https://, got '{value}'"
                )));
            }
        }

        if let Some(ref url) = self.metrics_pushgateway_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "metrics_pushgateway_url must start with http:// or https://, got '{url}'"
            )));
        }

        if self.quay_url.trim().is_empty() {
            return Err(Error::Config("quay_url cannot be empty".into()));
        }

        for (name, low, moderate, high) in [
            (
                "pypi_popularity",
                self.pypi_popularity_low,
                self.pypi_popularity_moderate,
                self.pypi_popularity_high,
            ),
            (
                "gh_popularity",
                self.gh_popularity_low,
                self.gh_popularity_moderate,
                self.gh_popularity_high,
            ),
        ] {
            if !(low < moderate && moderate < high) {
                return Err(Error::Config(format!(
                    "{name} thresholds must increase (low < moderate < high), got {low}/{moderate}/{high}"
                )));
            }
        }

        if !(1..=3600).contains(&self.timeout_secs) {
            return Err(Error::Config(format!(
                "timeout_secs must be 1-3600, got {}",
                self.timeout_secs
            )));
        }

        if self.http_max_retries > 20 {
            return Err(Error::Config(format!(
                "http_max_retries must be at most 20, got {}",
                self.http_max_retries
            )));
        }

        if self.http_retry_initial_ms == 0 || self.http_retry_initial_ms > self.http_retry_max_ms {
            return Err(Error::Config(format!(
                "http_retry_initial_ms must be positive and not exceed http_retry_max_ms ({} > {})",
                self.http_retry_initial_ms, self.http_retry_max_ms
            )));
        }

        if self.github_app_id.is_some() != self.github_private_key_path.is_some() {
            return Err(Error::Config(
                "GITHUB_APP_ID and GITHUB_PRIVATE_KEY_PATH must be set together".into(),
            ));
        }

        Ok(())
    }

    pub fn labels(&self) -> Vec<String> {
        split_list(&self.github_labels)
    }

    pub fn github_tokens(&self) -> Vec<SecretString> {
        self.github_token
            .as_ref()
            .map(|pool| {
                split_list(pool.expose_secret())
                    .into_iter()
                    .map(SecretString::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_github_app(&self) -> bool {
        self.github_app_id.is_some() && self.github_private_key_path.is_some()
    }

    pub fn configured_images(&self) -> Vec<String> {
        configured_parameters(&self.configured_images)
    }

    /// ML, NLP and CV package lists merged in that order, duplicates dropped.
    pub fn representative_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = Vec::new();
        for list in [&self.ml_packages, &self.nlp_packages, &self.cv_packages] {
            for package in configured_parameters(list) {
                if !packages.contains(&package) {
                    packages.push(package);
                }
            }
        }
        packages
    }

    /// Handlers named by the `handlers` setting.
    pub fn selected_handlers(&self) -> Result<Vec<HandlerKind>> {
        split_list(&self.handlers)
            .iter()
            .map(|name| name.parse())
            .collect()
    }

    fn has_credential(&self, credential: Credential) -> bool {
        match credential {
            Credential::GitHub => !self.github_tokens().is_empty() || self.has_github_app(),
            Credential::Quay => self
                .quay_token
                .as_ref()
                .is_some_and(|t| !t.expose_secret().trim().is_empty()),
            Credential::Warehouse => {
                self.bigquery_access_token.is_some() || self.google_application_credentials.is_some()
            }
        }
    }

    /// Fail fast when a selected handler, or the pull request submission,
    /// lacks a credential.
    pub fn require_credentials(&self, handlers: &[HandlerKind], submit: bool) -> Result<()> {
        for kind in handlers {
            for credential in kind.credentials() {
                if !self.has_credential(*credential) {
                    return Err(Error::MissingCredential {
                        handler: kind.to_string(),
                        credential: credential.describe().into(),
                        env: credential.env_hint().into(),
                    });
                }
            }
        }

        if submit && !self.has_credential(Credential::GitHub) {
            return Err(Error::MissingCredential {
                handler: "pull request submission".into(),
                credential: Credential::GitHub.describe().into(),
                env: Credential::GitHub.env_hint().into(),
            });
        }

        Ok(())
    }

    /// Create default config file with secure permissions
    pub fn create_default() -> Result<PathBuf> {
        let Some(dir) = Self::config_dir() else {
            return Err(Error::Config("Cannot determine config directory".into()));
        };

        fs::create_dir_all(&dir)?;

        let path = dir.join("config.toml");
        let content = r#"# prescriptions-refresh configuration
#
# Every key can also be set through THOTH_PRESCRIPTIONS_REFRESH_<KEY>.

# Repository the pull request is opened against
repo = "git@github.com:thoth-station/prescriptions.git"

# Comma separated pull request labels
github_labels = "bot"

# Handlers run by `prescriptions-refresh run` without arguments
# handlers = "gh-link,gh-archived,scorecards"

# Log documents instead of writing them
dry_run = false

# Shuffle project order to spread rate limits across runs
randomize = false

# Credentials are best kept in the environment:
#   THOTH_PRESCRIPTIONS_REFRESH_GITHUB_TOKEN, GITHUB_APP_ID + GITHUB_PRIVATE_KEY_PATH,
#   THOTH_PRESCRIPTIONS_REFRESH_QUAY_TOKEN, GOOGLE_APPLICATION_CREDENTIALS

quay_url = "quay.io"
quay_ps_namespace_name = "thoth-station"

# Thresholds
# gh_popularity_low = 20
# gh_popularity_moderate = 100
# gh_popularity_high = 1000
# gh_updated_days = 365
# pypi_artifact_report_size = 3145728
# scorecard_freshness_weeks = 2

# Retry policy for every outbound HTTP request
# http_max_retries = 5
# http_retry_initial_ms = 1000
# http_retry_max_ms = 60000
"#;

        fs::write(&path, content)?;

        // Set secure permissions (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&path, perms)?;
        }

        Ok(path)
    }
}
