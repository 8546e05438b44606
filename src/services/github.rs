// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::services::auth::GitHubCredentials;
use crate::services::http::{HttpClient, ensure_success};

const SERVICE: &str = "github";
const ACCEPT: &str = "application/vnd.github+json";

/// `owner/repo` of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    pub owner: String,
    pub repo: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Parse a git remote: `git@github.com:owner/repo.git` or
    /// `https://github.com/owner/repo(.git)`.
    pub fn parse_remote(remote: &str) -> Option<Self> {
        let remote = remote.trim();
        let path = if let Some(rest) = remote.strip_prefix("git@") {
            rest.split_once(':')?.1
        } else {
            let url = Url::parse(remote).ok()?;
            return Self::from_segments(url.path().trim_matches('/'));
        };
        Self::from_segments(path.trim_matches('/'))
    }

    fn from_segments(path: &str) -> Option<Self> {
        let (owner, repo) = path.split_once('/')?;
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return None;
        }
        Some(Self::new(owner, repo))
    }

    /// Parse a web link whose path is exactly `/owner/repo`.
    pub fn from_link(link: &str) -> Option<Self> {
        let url = Url::parse(link).ok()?;
        let segments: Vec<&str> = url.path_segments()?.collect();
        match segments.as_slice() {
            [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
                Some(Self::new(*owner, *repo))
            }
            _ => None,
        }
    }

    pub fn web_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryInfo {
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl RepositoryInfo {
    pub fn popularity_score(&self) -> u64 {
        self.forks_count + self.stargazers_count + self.watchers_count
    }
}

#[derive(Deserialize)]
struct CommitEntry {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

pub struct GitHub {
    http: HttpClient,
    api_url: String,
    web_url: String,
    credentials: GitHubCredentials,
}

impl GitHub {
    pub fn new(http: HttpClient, config: &Config, credentials: GitHubCredentials) -> Self {
        Self {
            http,
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            web_url: config.github_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn api_token(&self) -> Result<Option<String>> {
        self.credentials.api_token(&self.http, &self.api_url).await
    }

    async fn submission_token(&self) -> Result<String> {
        self.credentials
            .submission_token(&self.http, &self.api_url)
            .await
    }

    fn authorized(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let builder = builder.header("Accept", ACCEPT);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_opt<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let token = self.api_token().await?;
        let url = format!("{}{path}", self.api_url);
        self.http
            .json_opt(SERVICE, |c: &Client| {
                Self::authorized(c.get(&url), token.as_deref()).query(query)
            })
            .await
    }

    /// Repository metadata; `None` when the repository does not exist.
    pub async fn repository(&self, slug: &RepoSlug) -> Result<Option<RepositoryInfo>> {
        self.get_opt(&format!("/repos/{}/{}", slug.owner, slug.repo), &[])
            .await
    }

    /// Committer date of the newest commit on the default branch.
    pub async fn last_commit_date(&self, slug: &RepoSlug) -> Result<Option<DateTime<Utc>>> {
        let commits: Option<Vec<CommitEntry>> = self
            .get_opt(
                &format!("/repos/{}/{}/commits", slug.owner, slug.repo),
                &[("per_page", "1".into())],
            )
            .await?;

        Ok(commits
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.commit.committer)
            .and_then(|s| s.date))
    }

    /// Number of contributors, anonymous ones included, capped at `limit + 1`.
    pub async fn contributors(&self, slug: &RepoSlug, limit: usize) -> Result<Option<usize>> {
        let path = format!("/repos/{}/{}/contributors", slug.owner, slug.repo);
        let token = self.api_token().await?;
        let url = format!("{}{path}", self.api_url);
        let per_page = (limit + 1).to_string();

        let response = self
            .http
            .send(SERVICE, |c| {
                Self::authorized(c.get(&url), token.as_deref())
                    .query(&[("per_page", per_page.as_str()), ("anon", "true")])
            })
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            // Empty repositories answer 204 without a body
            StatusCode::NO_CONTENT => Ok(Some(0)),
            _ => {
                let contributors: Vec<serde_json::Value> =
                    ensure_success(SERVICE, response).await?.json().await?;
                Ok(Some(contributors.len()))
            }
        }
    }

    /// HEAD a page on the GitHub website, following redirects.
    ///
    /// Returns the final URL for 200 and `None` for 404. Transferred
    /// repositories redirect to their new home, which is what callers record.
    pub async fn web_head(&self, path: &str) -> Result<Option<String>> {
        let url = format!("{}/{}", self.web_url, path.trim_start_matches('/'));
        let response = self.http.send("github-web", |c| c.head(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success("github-web", response).await?;
        Ok(Some(response.url().to_string()))
    }

    pub async fn default_branch(&self, slug: &RepoSlug) -> Result<String> {
        let token = self.submission_token().await?;
        let url = format!("{}/repos/{}/{}", self.api_url, slug.owner, slug.repo);
        let info: RepositoryInfo = self
            .http
            .json(SERVICE, |c| Self::authorized(c.get(&url), Some(&token)))
            .await?;
        Ok(info.default_branch.unwrap_or_else(|| "main".into()))
    }

    /// Open pull request whose head is `branch` of the same repository.
    pub async fn find_open_pull(&self, slug: &RepoSlug, branch: &str) -> Result<Option<PullRequest>> {
        let token = self.submission_token().await?;
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, slug.owner, slug.repo);
        let head = format!("{}:{branch}", slug.owner);
        let pulls: Vec<PullRequest> = self
            .http
            .json(SERVICE, |c| {
                Self::authorized(c.get(&url), Some(&token))
                    .query(&[("state", "open"), ("head", head.as_str())])
            })
            .await?;
        Ok(pulls.into_iter().next())
    }

    /// Open a pull request. `None` means one already exists for the head.
    pub async fn create_pull(
        &self,
        slug: &RepoSlug,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        let token = self.submission_token().await?;
        let url = format!("{}/repos/{}/{}/pulls", self.api_url, slug.owner, slug.repo);
        let payload = json!({ "title": title, "body": body, "head": head, "base": base });

        let response = self
            .http
            .send(SERVICE, |c| {
                Self::authorized(c.post(&url), Some(&token)).json(&payload)
            })
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if body.contains("already exists") {
                return Ok(None);
            }
            return Err(Error::Submission(format!(
                "GitHub rejected the pull request: {body}"
            )));
        }

        Ok(Some(ensure_success(SERVICE, response).await?.json().await?))
    }

    pub async fn update_pull(
        &self,
        slug: &RepoSlug,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let token = self.submission_token().await?;
        let url = format!(
            "{}/repos/{}/{}/pulls/{number}",
            self.api_url, slug.owner, slug.repo
        );
        let payload = json!({ "title": title, "body": body });
        self.http
            .json(SERVICE, |c| {
                Self::authorized(c.patch(&url), Some(&token)).json(&payload)
            })
            .await
    }

    pub async fn add_labels(&self, slug: &RepoSlug, number: u64, labels: &[String]) -> Result<()> {
        let token = self.submission_token().await?;
        let url = format!(
            "{}/repos/{}/{}/issues/{number}/labels",
            self.api_url, slug.owner, slug.repo
        );
        let payload = json!({ "labels": labels });
        let response = self
            .http
            .send(SERVICE, |c| {
                Self::authorized(c.post(&url), Some(&token)).json(&payload)
            })
            .await?;
        ensure_success(SERVICE, response).await?;
        Ok(())
    }

    /// Token used for the authenticated push.
    pub async fn push_token(&self) -> Result<String> {
        self.submission_token().await
    }
}
