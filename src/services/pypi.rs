// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Package index client: the JSON API plus the project and user pages,
//! which are the only place maintainers are published.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::services::http::HttpClient;

const SERVICE: &str = "pypi";

pub const PYPI_INDEX_URL: &str = crate::domain::DEFAULT_INDEX_URL;

static MAINTAINER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="sidebar-section__maintainer">\s*<a href="/user/([^/"]+)/""#).unwrap()
});

static PACKAGE_TITLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<h3 class="package-snippet__title">\s*([^<]*?)\s*</h3>"#).unwrap()
});

static JOINED_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)author-profile__metadiv.*?<time[^>]*datetime="([^"]+)""#).unwrap()
});

/// PEP 440 public version, case insensitive.
static PEP440_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^\s*v?
        (?:[0-9]+!)?
        [0-9]+(?:\.[0-9]+)*
        (?:[-_.]?(?:a|b|c|rc|alpha|beta|pre|preview)[-_.]?[0-9]*)?
        (?:-[0-9]+|[-_.]?(?:post|rev|r)[-_.]?[0-9]*)?
        (?:[-_.]?dev[-_.]?[0-9]*)?
        (?:\+[a-z0-9]+(?:[-_.][a-z0-9]+)*)?
        \s*$",
    )
    .unwrap()
});

/// Whether `version` is a PEP 440 version rather than a legacy one.
pub fn is_pep440(version: &str) -> bool {
    PEP440_REGEX.is_match(version)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub home_page: Option<String>,
    #[serde(default)]
    pub package_url: Option<String>,
    #[serde(default)]
    pub project_urls: Option<BTreeMap<String, Option<String>>>,
}

impl PackageInfo {
    /// Home page, package URL, then the project URLs in key order.
    pub fn url_candidates(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        urls.extend(self.home_page.as_deref());
        urls.extend(self.package_url.as_deref());
        if let Some(ref project_urls) = self.project_urls {
            urls.extend(project_urls.values().filter_map(|u| u.as_deref()));
        }
        urls.retain(|u| !u.trim().is_empty());
        urls
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseFile {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub upload_time_iso_8601: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub info: PackageInfo,
    #[serde(default)]
    pub releases: BTreeMap<String, Vec<ReleaseFile>>,
    /// Files of the latest release
    #[serde(default)]
    pub urls: Vec<ReleaseFile>,
}

impl ProjectInfo {
    /// Upload time of the newest file of the latest release.
    pub fn last_upload(&self) -> Option<DateTime<Utc>> {
        self.urls.iter().filter_map(|f| f.upload_time_iso_8601).max()
    }

    /// Release whose files were uploaded last.
    pub fn newest_release(&self) -> Option<&str> {
        self.releases
            .iter()
            .filter_map(|(version, files)| {
                files
                    .iter()
                    .filter_map(|f| f.upload_time_iso_8601)
                    .max()
                    .map(|uploaded| (uploaded, version))
            })
            .max()
            .map(|(_, version)| version.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainerProfile {
    pub username: String,
    pub projects: usize,
    /// Only shown for accounts created after the index started recording it
    pub joined: Option<DateTime<Utc>>,
}

pub struct PyPI {
    http: HttpClient,
    base_url: String,
    profiles: Mutex<HashMap<String, Option<MaintainerProfile>>>,
}

impl PyPI {
    pub fn new(http: HttpClient, config: &Config) -> Self {
        Self {
            http,
            base_url: config.pypi_url.trim_end_matches('/').to_string(),
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// JSON metadata of a project; `None` when it does not exist.
    pub async fn project(&self, name: &str) -> Result<Option<ProjectInfo>> {
        let url = format!("{}/pypi/{name}/json", self.base_url);
        self.http.json_opt(SERVICE, |c| c.get(&url)).await
    }

    /// Usernames listed on the project page.
    pub async fn maintainers(&self, name: &str) -> Result<Option<Vec<String>>> {
        let url = format!("{}/project/{name}/", self.base_url);
        let Some(page) = self.http.text_opt(SERVICE, |c| c.get(&url)).await? else {
            return Ok(None);
        };
        Ok(Some(parse_maintainers(&page)))
    }

    /// Profile of a maintainer, fetched once per run.
    pub async fn maintainer(&self, username: &str) -> Result<Option<MaintainerProfile>> {
        if let Some(cached) = self.profiles.lock().await.get(username) {
            return Ok(cached.clone());
        }

        let url = format!("{}/user/{username}/", self.base_url);
        let profile = self
            .http
            .text_opt(SERVICE, |c| c.get(&url))
            .await?
            .map(|page| parse_profile(username, &page));
        debug!(username, found = profile.is_some(), "maintainer profile");

        self.profiles
            .lock()
            .await
            .insert(username.to_string(), profile.clone());
        Ok(profile)
    }
}

pub fn parse_maintainers(page: &str) -> Vec<String> {
    let mut maintainers: Vec<String> = Vec::new();
    for captures in MAINTAINER_REGEX.captures_iter(page) {
        let name = captures[1].to_string();
        if !maintainers.contains(&name) {
            maintainers.push(name);
        }
    }
    maintainers
}

pub fn parse_profile(username: &str, page: &str) -> MaintainerProfile {
    let projects = PACKAGE_TITLE_REGEX.captures_iter(page).count();
    let joined = JOINED_REGEX
        .captures(page)
        .and_then(|c| parse_datetime(&c[1]));

    MaintainerProfile {
        username: username.to_string(),
        projects,
        joined,
    }
}

/// RFC 3339, a `+0000` style offset, or a naive timestamp taken as UTC.
fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pep440_versions() {
        for version in ["1.0", "2.0.0rc1", "1.0.post2", "1!2.0", "0.1.dev3", "1.0+local.7"] {
            assert!(is_pep440(version), "{version}");
        }
        for version in ["foo", "1.0-beta-final", "2004d"] {
            assert!(!is_pep440(version), "{version}");
        }
    }

    #[test]
    fn scrapes_profile() {
        let page = r#"
            <div class="author-profile__metadiv">
              <p>Joined <time datetime="2024-03-01T10:00:00+0000" data-controller="localized-time">Mar 1, 2024</time></p>
            </div>
            <h3 class="package-snippet__title">flask</h3>
            <h3 class="package-snippet__title">click</h3>
        "#;
        let profile = parse_profile("davidism", page);
        assert_eq!(profile.projects, 2);
        assert_eq!(
            profile.joined.map(|d| d.to_rfc3339()),
            Some("2024-03-01T10:00:00+00:00".to_string())
        );
    }

    #[test]
    fn maintainers_are_deduplicated() {
        let page = r#"
            <span class="sidebar-section__maintainer">
              <a href="/user/davidism/" aria-label="davidism">davidism</a>
            </span>
            <span class="sidebar-section__maintainer">
              <a href="/user/pallets/" aria-label="pallets">pallets</a>
            </span>
            <span class="sidebar-section__maintainer">
              <a href="/user/davidism/" aria-label="davidism">davidism</a>
            </span>
        "#;
        assert_eq!(parse_maintainers(page), vec!["davidism", "pallets"]);
    }
}
