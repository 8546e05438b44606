// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Shared HTTP client with a bounded exponential backoff.
//!
//! Every outbound request goes through [`HttpClient::send`]. Rate limiting
//! (429), gateway errors (502, 503, 504), connection failures and timeouts
//! are retried; a `Retry-After` header, when present, replaces the computed
//! delay. Once the attempts are used up the request fails with
//! [`Error::RetriesExhausted`].

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

const RETRYABLE: [StatusCode; 4] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.http_max_retries,
            initial_delay: Duration::from_millis(config.http_retry_initial_ms),
            max_delay: Duration::from_millis(config.http_retry_max_ms),
            ..Self::default()
        }
    }

    /// Next delay, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpClient {
    pub fn new(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            retry: RetryPolicy::from_config(config),
            cancel,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send the request produced by `build`, retrying transient failures.
    ///
    /// `build` is called once per attempt. Any response outside the retryable
    /// set is returned as is, error statuses included.
    pub async fn send<F>(&self, service: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let request = build(&self.client).build()?;
            let url = request.url().to_string();
            let method = request.method().clone();

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                result = self.client.execute(request) => result,
            };

            let (status, retry_after) = match result {
                Ok(response) if RETRYABLE.contains(&response.status()) => {
                    let status = response.status();
                    (Some(status.as_u16()), retry_after(&response))
                }
                Ok(response) => {
                    debug!(service, %method, url = %url, status = response.status().as_u16(), "response");
                    return Ok(response);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    debug!(service, url = %url, error = %e, "transport error");
                    (None, None)
                }
                Err(e) => return Err(e.into()),
            };

            if attempt > self.retry.max_retries {
                return Err(Error::RetriesExhausted {
                    service: service.to_string(),
                    url,
                    attempts: attempt,
                    status,
                });
            }

            let wait = retry_after.map_or(delay, |d| d.min(self.retry.max_delay));
            warn!(
                service,
                url = %url,
                attempt,
                status = status.unwrap_or_default(),
                wait_ms = wait.as_millis() as u64,
                "request failed, retrying"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }

            delay = self.retry.next_delay(delay);
        }
    }

    /// Decode a successful JSON response; any other status is an
    /// [`Error::Upstream`].
    pub async fn json<T, F>(&self, service: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send(service, build).await?;
        let response = ensure_success(service, response).await?;
        Ok(response.json().await?)
    }

    /// Like [`json`](Self::json), with 404 mapped to `None`.
    pub async fn json_opt<T, F>(&self, service: &str, build: F) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send(service, build).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(service, response).await?;
        Ok(Some(response.json().await?))
    }

    /// Page body as text, 404 mapped to `None`.
    pub async fn text_opt<F>(&self, service: &str, build: F) -> Result<Option<String>>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send(service, build).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(service, response).await?;
        Ok(Some(response.text().await?))
    }
}

/// Turn a non-2xx response into [`Error::Upstream`].
pub async fn ensure_success(service: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(Error::Upstream {
        service: service.to_string(),
        url,
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// `Retry-After` as delay seconds or an HTTP date.
fn retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.signed_duration_since(chrono::Utc::now());
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
