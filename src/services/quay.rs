// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Container registry API (Quay).

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::services::http::HttpClient;

const SERVICE: &str = "quay";

/// Image name prefixes of predictable stacks and s2i images.
const IMAGE_PREFIXES: [&str; 2] = ["ps-", "s2i-"];

#[derive(Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    repositories: Vec<RepositoryEntry>,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Deserialize)]
struct RepositoryEntry {
    name: String,
}

#[derive(Deserialize)]
struct ImageList {
    #[serde(default)]
    images: Vec<ContainerImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerImage {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub uploading: bool,
}

impl ContainerImage {
    /// Version tags (`v*`); one build may carry several.
    pub fn version_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .map(String::as_str)
            .filter(|t| t.starts_with('v'))
    }
}

#[derive(Deserialize)]
struct ImageDetail {
    #[serde(default)]
    history: Vec<Layer>,
}

#[derive(Deserialize)]
struct Layer {
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct SecurityReport {
    #[serde(default)]
    data: Option<SecurityData>,
}

#[derive(Deserialize)]
struct SecurityData {
    #[serde(rename = "Layer", default)]
    layer: Option<SecurityLayer>,
}

#[derive(Deserialize)]
struct SecurityLayer {
    #[serde(rename = "Features", default)]
    features: Option<Vec<Feature>>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<Vulnerability>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Link", default)]
    pub link: Option<String>,
}

pub struct Quay {
    http: HttpClient,
    base_url: String,
    host: String,
    namespace: String,
    public: bool,
    token: Option<String>,
}

impl Quay {
    pub fn new(http: HttpClient, config: &Config) -> Self {
        let configured = config.quay_url.trim_end_matches('/');
        let (base_url, host) = match configured.split_once("://") {
            Some((_, host)) => (configured.to_string(), host.to_string()),
            None => (format!("https://{configured}"), configured.to_string()),
        };

        Self {
            http,
            base_url,
            host,
            namespace: config.quay_ps_namespace_name.clone(),
            public: config.quay_ps_namespace_public,
            token: config
                .quay_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registry host as used in image references.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// `host/namespace/image:tag`
    pub fn image_reference(&self, image: &str, tag: &str) -> String {
        format!("{}/{}/{image}:{tag}", self.host, self.namespace)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/api/v1{path}", self.base_url);
        let token = self.token.as_deref();
        self.http
            .json(SERVICE, |c: &Client| {
                let builder = c.get(&url).query(query);
                match token {
                    Some(token) => builder.bearer_auth(token),
                    None => builder,
                }
            })
            .await
    }

    /// Page-by-page listing of the namespace's image repositories.
    pub fn repositories(&self) -> RepositoryListing<'_> {
        RepositoryListing {
            quay: self,
            next: Some(None),
        }
    }

    /// Builds of `image` that are fully uploaded and carry a version tag,
    /// sorted by id.
    pub async fn images(&self, image: &str) -> Result<Vec<ContainerImage>> {
        let list: ImageList = self
            .get(&format!("/repository/{}/{image}/image", self.namespace), &[])
            .await?;

        let mut images: Vec<ContainerImage> = list
            .images
            .into_iter()
            .filter(|i| {
                if i.uploading {
                    warn!(image, id = %i.id, "skipping image still being uploaded");
                    return false;
                }
                if i.version_tags().next().is_none() {
                    // Untagged entries are plain layers
                    if !i.tags.is_empty() {
                        debug!(image, id = %i.id, tags = ?i.tags, "no version tag");
                    }
                    return false;
                }
                true
            })
            .collect();
        images.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(images)
    }

    /// Image size as the sum of its layer sizes.
    pub async fn image_size(&self, image: &str, id: &str) -> Result<u64> {
        let detail: ImageDetail = self
            .get(&format!("/repository/{}/{image}/image/{id}", self.namespace), &[])
            .await?;
        Ok(detail.history.iter().filter_map(|l| l.size).sum())
    }

    /// Vulnerabilities reported by the registry scanner, in report order.
    pub async fn vulnerabilities(&self, image: &str, id: &str) -> Result<Vec<Vulnerability>> {
        let report: SecurityReport = self
            .get(
                &format!("/repository/{}/{image}/image/{id}/security", self.namespace),
                &[("vulnerabilities", "true")],
            )
            .await?;

        Ok(report
            .data
            .and_then(|d| d.layer)
            .and_then(|l| l.features)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|f| f.vulnerabilities.unwrap_or_default())
            .collect())
    }
}

/// Cursor over the registry's paginated repository listing.
pub struct RepositoryListing<'a> {
    quay: &'a Quay,
    /// `Some(token)` while pages remain; the first page has no token
    next: Option<Option<String>>,
}

impl RepositoryListing<'_> {
    /// Next page of predictable stack image names, sorted; `None` when done.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        let Some(token) = self.next.take() else {
            return Ok(None);
        };

        let public = if self.quay.public { "true" } else { "false" };
        let mut query = vec![("public", public), ("namespace", self.quay.namespace.as_str())];
        if let Some(ref token) = token {
            query.push(("next_page", token.as_str()));
        }

        let page: RepositoryPage = self.quay.get("/repository", &query).await?;
        self.next = page.next_page.filter(|t| !t.is_empty()).map(Some);

        let mut names: Vec<String> = page
            .repositories
            .into_iter()
            .map(|r| r.name)
            .filter(|name| IMAGE_PREFIXES.iter().any(|p| name.starts_with(p)))
            .collect();
        names.sort();
        Ok(Some(names))
    }
}
