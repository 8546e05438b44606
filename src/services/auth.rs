// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Credentials for GitHub and the download warehouse.
//!
//! Both exchange a short lived RS256 assertion for an access token: a GitHub
//! App JWT for an installation token, a service account JWT for an OAuth
//! token. Exchanged tokens are cached until shortly before they expire.

use std::path::Path;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rand::seq::IndexedRandom;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::github::RepoSlug;
use crate::services::http::{HttpClient, ensure_success};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Renew cached tokens this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

struct CachedToken {
    token: SecretString,
    valid_until: Instant,
}

/// Mutex guarded slot holding one exchanged token.
#[derive(Default)]
struct TokenCache(Mutex<Option<CachedToken>>);

impl TokenCache {
    async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(SecretString, Duration)>>,
    {
        let mut slot = self.0.lock().await;
        if let Some(cached) = slot.as_ref()
            && cached.valid_until > Instant::now()
        {
            return Ok(cached.token.expose_secret().to_string());
        }

        let (token, lifetime) = fetch().await?;
        let value = token.expose_secret().to_string();
        *slot = Some(CachedToken {
            token,
            valid_until: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        });
        Ok(value)
    }
}

fn read_rsa_key(path: &Path) -> Result<EncodingKey> {
    let pem = std::fs::read(path).map_err(|e| {
        Error::Auth(format!("cannot read private key {}: {e}", path.display()))
    })?;
    Ok(EncodingKey::from_rsa_pem(&pem)?)
}

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Signs GitHub App JWTs and trades them for installation tokens of the
/// prescriptions repository.
pub struct GitHubApp {
    app_id: u64,
    key: EncodingKey,
    repository: RepoSlug,
    cache: TokenCache,
}

#[derive(Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Deserialize)]
struct InstallationToken {
    token: String,
}

impl GitHubApp {
    pub fn new(app_id: u64, key_path: &Path, repository: RepoSlug) -> Result<Self> {
        Ok(Self {
            app_id,
            key: read_rsa_key(key_path)?,
            repository,
            cache: TokenCache::default(),
        })
    }

    /// JWT valid for nine minutes, issued a minute in the past to absorb
    /// clock drift.
    pub fn jwt(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.to_string(),
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }

    pub async fn installation_token(&self, http: &HttpClient, api_url: &str) -> Result<String> {
        self.cache
            .get_or_fetch(|| async {
                let jwt = self.jwt()?;
                let url = format!(
                    "{api_url}/repos/{}/{}/installation",
                    self.repository.owner, self.repository.repo
                );
                let installation: Installation = http
                    .json("github", |c| {
                        c.get(&url)
                            .bearer_auth(&jwt)
                            .header("Accept", "application/vnd.github+json")
                    })
                    .await
                    .map_err(|e| Error::Auth(format!("GitHub App installation lookup: {e}")))?;

                let url = format!("{api_url}/app/installations/{}/access_tokens", installation.id);
                let token: InstallationToken = http
                    .json("github", |c| {
                        c.post(&url)
                            .bearer_auth(&jwt)
                            .header("Accept", "application/vnd.github+json")
                    })
                    .await
                    .map_err(|e| Error::Auth(format!("GitHub App token exchange: {e}")))?;

                debug!(installation = installation.id, "obtained installation token");
                // Installation tokens live for one hour
                Ok((SecretString::from(token.token), Duration::from_secs(3600)))
            })
            .await
    }
}

/// Token pool plus an optional GitHub App.
pub struct GitHubCredentials {
    tokens: Vec<SecretString>,
    app: Option<GitHubApp>,
}

impl GitHubCredentials {
    pub fn new(tokens: Vec<SecretString>, app: Option<GitHubApp>) -> Self {
        Self { tokens, app }
    }

    pub fn from_config(config: &Config, repository: Option<&RepoSlug>) -> Result<Self> {
        let app = match (
            config.github_app_id,
            config.github_private_key_path.as_deref(),
            repository,
        ) {
            (Some(app_id), Some(path), Some(slug)) => {
                Some(GitHubApp::new(app_id, path, slug.clone())?)
            }
            _ => None,
        };
        Ok(Self::new(config.github_tokens(), app))
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.app.is_none()
    }

    /// A random pool token, spreading rate limits across the pool.
    fn pooled(&self) -> Option<String> {
        self.tokens
            .choose(&mut rand::rng())
            .map(|t| t.expose_secret().to_string())
    }

    /// Token for read-only API queries: pool first, then the App.
    pub async fn api_token(&self, http: &HttpClient, api_url: &str) -> Result<Option<String>> {
        if let Some(token) = self.pooled() {
            return Ok(Some(token));
        }
        match self.app {
            Some(ref app) => Ok(Some(app.installation_token(http, api_url).await?)),
            None => Ok(None),
        }
    }

    /// Token for pushing and opening the pull request: App first, then pool.
    pub async fn submission_token(&self, http: &HttpClient, api_url: &str) -> Result<String> {
        if let Some(ref app) = self.app {
            return app.installation_token(http, api_url).await;
        }
        self.pooled().ok_or_else(|| {
            Error::Auth("no GitHub token or GitHub App configured for submission".into())
        })
    }
}

/// Fields of a Google service account key file.
#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.into()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Auth(format!("cannot read service account {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Auth(format!("invalid service account {}: {e}", path.display())))
    }
}

#[derive(Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct OAuthToken {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// OAuth token source for the warehouse.
pub struct WarehouseCredentials {
    source: TokenSource,
}

enum TokenSource {
    /// Pre-minted token used as is
    Static(SecretString),
    ServiceAccount {
        key: ServiceAccountKey,
        cache: TokenCache,
    },
}

impl WarehouseCredentials {
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let source = if let Some(ref token) = config.bigquery_access_token {
            TokenSource::Static(SecretString::from(token.expose_secret().to_string()))
        } else if let Some(ref path) = config.google_application_credentials {
            TokenSource::ServiceAccount {
                key: ServiceAccountKey::from_file(path)?,
                cache: TokenCache::default(),
            }
        } else {
            return Ok(None);
        };
        Ok(Some(Self { source }))
    }

    pub fn project_id(&self) -> Option<&str> {
        match self.source {
            TokenSource::Static(_) => None,
            TokenSource::ServiceAccount { ref key, .. } => key.project_id.as_deref(),
        }
    }

    pub async fn access_token(&self, http: &HttpClient) -> Result<String> {
        match self.source {
            TokenSource::Static(ref token) => Ok(token.expose_secret().to_string()),
            TokenSource::ServiceAccount { ref key, ref cache } => {
                cache.get_or_fetch(|| exchange_assertion(http, key)).await
            }
        }
    }
}

async fn exchange_assertion(
    http: &HttpClient,
    key: &ServiceAccountKey,
) -> Result<(SecretString, Duration)> {
    let now = chrono::Utc::now().timestamp();
    let claims = ServiceAccountClaims {
        iss: &key.client_email,
        scope: BIGQUERY_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())?;
    let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?;

    let body: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", JWT_BEARER_GRANT)
        .append_pair("assertion", &assertion)
        .finish();

    let response = http
        .send("google-oauth", |c| {
            c.post(&key.token_uri)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(body.clone())
        })
        .await?;
    let response = ensure_success("google-oauth", response)
        .await
        .map_err(|e| Error::Auth(format!("service account token exchange: {e}")))?;
    let token: OAuthToken = response.json().await?;

    debug!(account = %key.client_email, "obtained warehouse access token");
    Ok((
        SecretString::from(token.access_token),
        Duration::from_secs(token.expires_in),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn http() -> HttpClient {
        HttpClient::new(&Config::default(), CancellationToken::new()).unwrap()
    }

    #[tokio::test]
    async fn cached_token_is_reused() {
        let cache = TokenCache::default();
        let hour = Duration::from_secs(3600);
        let first = cache
            .get_or_fetch(|| async move { Ok((SecretString::from("one".to_string()), hour)) })
            .await
            .unwrap();
        let second = cache
            .get_or_fetch(|| async move { Ok((SecretString::from("two".to_string()), hour)) })
            .await
            .unwrap();
        assert_eq!(first, "one");
        assert_eq!(second, "one");
    }

    #[tokio::test]
    async fn pool_serves_api_and_submission_without_app() {
        let credentials =
            GitHubCredentials::new(vec![SecretString::from("ghp_a".to_string())], None);
        let http = http();
        assert_eq!(
            credentials.api_token(&http, "http://unused").await.unwrap().as_deref(),
            Some("ghp_a")
        );
        assert_eq!(
            credentials.submission_token(&http, "http://unused").await.unwrap(),
            "ghp_a"
        );
    }

    #[tokio::test]
    async fn empty_pool_cannot_submit() {
        let credentials = GitHubCredentials::new(Vec::new(), None);
        assert!(credentials.is_empty());
        assert!(matches!(
            credentials.submission_token(&http(), "http://unused").await,
            Err(Error::Auth(_))
        ));
    }

    #[tokio::test]
    async fn static_warehouse_token() {
        let config = Config {
            bigquery_access_token: Some(SecretString::from("ya29.token".to_string())),
            ..Config::default()
        };
        let credentials = WarehouseCredentials::from_config(&config).unwrap().unwrap();
        assert_eq!(credentials.project_id(), None);
        assert_eq!(credentials.access_token(&http()).await.unwrap(), "ya29.token");
    }
}
