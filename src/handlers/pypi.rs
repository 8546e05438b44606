// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Handlers built on the Python package index and its download statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{
    Justification, NameRegistry, Prescription, PrescriptionKey, PrescriptionPath, Unit, dependency,
};
use crate::error::Result;
use crate::handlers::{Handler, HandlerKind, PrescriptionSink, Services, human_size, skip_item};
use crate::services::pypi::{PYPI_INDEX_URL, ProjectInfo, is_pep440};
use crate::services::warehouse::{Query, QueryParameter};

const PROJECT_URL: &str = "https://pypi.org/project";

const DOWNLOADS_QUERY: &str = "\
SELECT file.project AS project, file.version AS version, COUNT(*) AS downloads
FROM `bigquery-public-data.pypi.file_downloads`
WHERE DATE(timestamp) BETWEEN DATE_SUB(CURRENT_DATE(), INTERVAL @days DAY) AND CURRENT_DATE()
  AND file.project IN UNNEST(@projects)
GROUP BY project, version
ORDER BY project, version";

/// Handlers reading one project at a time from the package index.
pub struct PackageIndex {
    kind: HandlerKind,
    services: Arc<Services>,
}

impl PackageIndex {
    pub fn new(kind: HandlerKind, services: Arc<Services>) -> Self {
        Self { kind, services }
    }

    fn config(&self) -> &Config {
        &self.services.config
    }

    async fn evaluate(&self, names: &mut NameRegistry, project: &str) -> Result<Vec<Prescription>> {
        match self.kind {
            HandlerKind::PypiMaintainers => self.maintainers(names, project).await,
            HandlerKind::PypiArtifactSize => self.artifact_size(names, project).await,
            _ => self.release(names, project).await,
        }
    }

    /// Warning wrap for any version of `project` from the public index.
    fn warning(
        &self,
        names: &mut NameRegistry,
        prefix: &str,
        project: &str,
        message: String,
    ) -> Result<Unit> {
        let key = PrescriptionKey::new(project).index_url(PYPI_INDEX_URL);
        Ok(Unit::wrap(names.name(prefix, &key)?)
            .matching(dependency(project, None, Some(PYPI_INDEX_URL)))
            .justification(
                Justification::warning(message)
                    .link(format!("{PROJECT_URL}/{project}/"))
                    .field("package_name", project),
            )
            .provenance(self.services.provenance()))
    }

    async fn maintainers(&self, names: &mut NameRegistry, project: &str) -> Result<Vec<Prescription>> {
        let Some(maintainers) = self.services.pypi.maintainers(project).await? else {
            warn!(project, "project page not found on PyPI");
            return Ok(Vec::new());
        };
        debug!(project, maintainers = ?maintainers, "maintainers");

        let config = self.config();
        let mut documents = Vec::with_capacity(3);

        let required = config.pypi_project_maintainers_count;
        let path = PrescriptionPath::new(project, "pypi_project_maintainers.yaml");
        documents.push(if maintainers.len() >= required {
            Prescription::retraction(
                path,
                format!("Project '{project}' has at least {required} maintainers on PyPI"),
            )
        } else {
            let unit = self.warning(
                names,
                "pypi-project-maintainers",
                project,
                format!(
                    "Project '{project}' has low number of maintainers on PyPI (less than {required})"
                ),
            )?;
            Prescription::new(
                path,
                format!("Project '{project}' has less than {required} maintainers on PyPI"),
            )
            .with_unit(unit)
        });

        let reach = config.pypi_maintainer_projects_count;
        let joined_days = config.pypi_maintainer_joined_age_days;
        let joined_before = Utc::now() - Duration::days(joined_days);
        let mut trusted = false;
        let mut established = false;
        for username in &maintainers {
            let Some(profile) = self.services.pypi.maintainer(username).await? else {
                // Accounts without a public profile predate join dates
                established = true;
                continue;
            };
            if profile.projects >= reach {
                info!(project, maintainer = %username, projects = profile.projects, "maintainer with enough projects");
                trusted = true;
            }
            match profile.joined {
                Some(joined) if joined > joined_before => {}
                _ => established = true,
            }
        }

        let path = PrescriptionPath::new(project, "pypi_maintainers.yaml");
        documents.push(if trusted {
            Prescription::retraction(
                path,
                format!("Project '{project}' has a maintainer with at least {reach} projects on PyPI"),
            )
        } else {
            let unit = self.warning(
                names,
                "pypi-maintainers",
                project,
                format!(
                    "Project '{project}' is maintained by maintainers that maintain small number of projects on PyPI (less than {reach})"
                ),
            )?;
            Prescription::new(
                path,
                format!("Project '{project}' has no maintainer with at least {reach} projects on PyPI"),
            )
            .with_unit(unit)
        });

        let path = PrescriptionPath::new(project, "pypi_maintainers_joined.yaml");
        documents.push(if established || maintainers.is_empty() {
            Prescription::retraction(
                path,
                format!("Project '{project}' has maintainers who are on PyPI for a longer period of time"),
            )
        } else {
            let unit = self.warning(
                names,
                "pypi-maintainers-joined",
                project,
                format!(
                    "Project '{project}' has maintainers that joined PyPI recently (less than {joined_days} days ago)"
                ),
            )?;
            Prescription::new(
                path,
                format!("Project '{project}' has maintainers who joined PyPI recently"),
            )
            .with_unit(unit)
        });

        Ok(documents)
    }

    async fn project_info(&self, project: &str) -> Result<Option<ProjectInfo>> {
        let info = self.services.pypi.project(project).await?;
        if info.is_none() {
            warn!(project, "project not found on PyPI");
        }
        Ok(info)
    }

    async fn artifact_size(&self, names: &mut NameRegistry, project: &str) -> Result<Vec<Prescription>> {
        let Some(info) = self.project_info(project).await? else {
            return Ok(Vec::new());
        };

        let report_size = self.config().pypi_artifact_report_size;
        let path = PrescriptionPath::new(project, "pypi_artifact_size.yaml");
        let mut document = Prescription::new(
            path.clone(),
            format!("Artifact size info from PyPI for package '{project}'"),
        );

        for (version, files) in &info.releases {
            if files.is_empty() {
                debug!(project, version = %version, "release without files");
                continue;
            }
            if !is_pep440(version) {
                warn!(project, version = %version, "skipping legacy version identifier");
                continue;
            }
            let size = files.iter().map(|f| f.size).max().unwrap_or_default();
            if size < report_size {
                continue;
            }

            let key = PrescriptionKey::new(project)
                .version(version.as_str())
                .index_url(PYPI_INDEX_URL);
            let unit = Unit::wrap(names.name(self.kind.id(), &key)?)
                .matching(dependency(project, Some(version), Some(PYPI_INDEX_URL)))
                .justification(
                    Justification::info(format!(
                        "Installed artifact size for package '{project}' in version '{version}' can have up to {}",
                        human_size(size)
                    ))
                    .link(format!("{PROJECT_URL}/{project}/{version}/#files"))
                    .field("package_name", project),
                )
                .provenance(self.services.provenance());
            document.push(unit);
        }

        if document.is_retraction() {
            info!(project, threshold = %human_size(report_size), "no release with large artifacts");
            return Ok(vec![Prescription::retraction(
                path,
                format!("No large artifacts on PyPI for package '{project}'"),
            )]);
        }
        Ok(vec![document])
    }

    async fn release(&self, names: &mut NameRegistry, project: &str) -> Result<Vec<Prescription>> {
        let Some(info) = self.project_info(project).await? else {
            return Ok(Vec::new());
        };
        let Some(last_upload) = info.last_upload() else {
            warn!(project, "no release files found on PyPI");
            return Ok(Vec::new());
        };

        let days = self.config().pypi_release_days;
        let path = PrescriptionPath::new(project, "pypi_release.yaml");
        if Utc::now() - last_upload <= Duration::days(days) {
            return Ok(vec![Prescription::retraction(
                path,
                format!("Project '{project}' has a recent release"),
            )]);
        }

        let key = PrescriptionKey::new(project);
        let unit = Unit::wrap(names.name(self.kind.id(), &key)?)
            .matching(dependency(project, None, None))
            .justification(
                Justification::warning(format!(
                    "Package '{project}' has no recent release, last release dates back to {}",
                    last_upload.format("%Y-%m-%d %H:%M:%S")
                ))
                .link(format!("{PROJECT_URL}/{project}/#history"))
                .field("package_name", project),
            )
            .provenance(self.services.provenance());
        Ok(vec![
            Prescription::new(path, format!("Project '{project}' has no recent releases"))
                .with_unit(unit),
        ])
    }
}

#[async_trait]
impl Handler for PackageIndex {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        for project in self.services.repository.projects()? {
            debug!(handler = %self.kind, project = %project, "checking project");
            match self.evaluate(names, &project).await {
                Ok(documents) => {
                    for document in documents {
                        sink.emit(document).await?;
                    }
                }
                Err(e) => skip_item(self.kind, &project, e)?,
            }
        }
        Ok(())
    }
}

/// Downloads of one project over the configured interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectDownloads {
    pub versions: BTreeMap<String, u64>,
}

impl ProjectDownloads {
    pub fn total(&self) -> u64 {
        self.versions.values().sum()
    }

    /// Version with the most downloads; the lowest version string on ties.
    pub fn most_downloaded(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (version, &count) in &self.versions {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((version, count));
            }
        }
        best
    }
}

/// Percentage bucket of `project` among the tracked projects, 1 being the
/// most downloaded.
pub fn top_percent(totals: &BTreeMap<String, u64>, project: &str) -> Option<u64> {
    let own = *totals.get(project)?;
    let ahead = totals.values().filter(|&&total| total > own).count() as u64;
    let tracked = totals.len() as u64;
    Some(((ahead + 1) * 100).div_ceil(tracked))
}

pub fn downloads_level(downloads: u64, config: &Config) -> &'static str {
    if downloads < config.pypi_popularity_low {
        "low"
    } else if downloads < config.pypi_popularity_moderate {
        "moderate"
    } else if downloads < config.pypi_popularity_high {
        "high"
    } else {
        "very high"
    }
}

/// Download popularity from the public PyPI downloads dataset.
pub struct PypiDownloads {
    services: Arc<Services>,
}

impl PypiDownloads {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Per project and version download counts, read page by page.
    async fn downloads(&self, projects: &[String]) -> Result<BTreeMap<String, ProjectDownloads>> {
        let days = self.services.config.pypi_downloads_time_interval;
        let query = Query::new(DOWNLOADS_QUERY)
            .param(QueryParameter::int64("days", i64::from(days)))
            .param(QueryParameter::string_array("projects", projects.iter().cloned()))
            .label("query_target", "pypi-file_downloads");

        info!(projects = projects.len(), days, "querying package downloads");
        let mut cursor = self.services.warehouse.query(&query).await?;
        let mut downloads: BTreeMap<String, ProjectDownloads> = BTreeMap::new();
        while let Some(rows) = cursor.next_page().await? {
            for row in rows {
                let parsed = row.require_fields("pypi-downloads", &["project", "version", "downloads"]).and_then(|()| {
                    Ok((
                        row.require_str("pypi-downloads", "project")?.to_string(),
                        row.require_str("pypi-downloads", "version")?.to_string(),
                        row.require_i64("pypi-downloads", "downloads")?,
                    ))
                });
                match parsed {
                    Ok((project, version, count)) => {
                        *downloads
                            .entry(project)
                            .or_default()
                            .versions
                            .entry(version)
                            .or_default() += u64::try_from(count).unwrap_or_default();
                    }
                    Err(e) => skip_item(HandlerKind::PypiDownloads, "downloads row", e)?,
                }
            }
        }
        Ok(downloads)
    }

    fn documents(
        &self,
        names: &mut NameRegistry,
        project: &str,
        downloads: &ProjectDownloads,
        top: u64,
    ) -> Result<Vec<Prescription>> {
        let config = &self.services.config;
        let days = config.pypi_downloads_time_interval;
        let link = format!("{PROJECT_URL}/{project}");
        let total = downloads.total();
        let Some((top_version, top_count)) = downloads.most_downloaded() else {
            return Ok(Vec::new());
        };

        let overall = Unit::wrap(names.name(HandlerKind::PypiDownloads.id(), &PrescriptionKey::new(project))?)
            .matching(dependency(project, None, None))
            .justification(
                Justification::info(format!(
                    "Project '{project}' is in the top {top}% most downloaded packages on PyPI in the last {days} days, with {total} downloads. The most downloaded package version is {top_version} with {top_count} downloads."
                ))
                .link(link.as_str())
                .field("package_name", project),
            )
            .provenance(self.services.provenance());

        let mut per_version = Prescription::new(
            PrescriptionPath::new(project, "pypi_downloads_per_version.yaml"),
            format!("PyPI downloads per version of '{project}'"),
        );
        for (version, &count) in &downloads.versions {
            let key = PrescriptionKey::new(project).version(version.as_str());
            let unit = Unit::wrap(names.name("pypi-downloads-per-version", &key)?)
                .matching(dependency(project, Some(version), None))
                .justification(
                    Justification::info(format!(
                        "Project '{project}' version {version} had a {} popularity level on PyPI in the last {days} days, with {count} downloads.",
                        downloads_level(count, config)
                    ))
                    .link(link.as_str())
                    .field("package_name", project),
                )
                .provenance(self.services.provenance());
            per_version.push(unit);
        }

        Ok(vec![
            Prescription::new(
                PrescriptionPath::new(project, "pypi_downloads.yaml"),
                format!("PyPI downloads of '{project}'"),
            )
            .with_unit(overall),
            per_version,
        ])
    }
}

#[async_trait]
impl Handler for PypiDownloads {
    fn kind(&self) -> HandlerKind {
        HandlerKind::PypiDownloads
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        let projects = self.services.repository.projects()?;
        if projects.is_empty() {
            return Ok(());
        }

        let downloads = self.downloads(&projects).await?;
        let totals: BTreeMap<String, u64> = downloads
            .iter()
            .map(|(project, d)| (project.clone(), d.total()))
            .collect();

        for project in &projects {
            let (Some(project_downloads), Some(top)) =
                (downloads.get(project), top_percent(&totals, project))
            else {
                info!(project = %project, "no downloads recorded");
                continue;
            };
            for document in self.documents(names, project, project_downloads, top)? {
                sink.emit(document).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
        entries.iter().map(|(p, t)| (p.to_string(), *t)).collect()
    }

    #[test]
    fn most_downloaded_project_is_in_the_top_bucket() {
        let totals = totals(&[("flask", 900), ("click", 500), ("jinja2", 100), ("tiny", 1)]);
        assert_eq!(top_percent(&totals, "flask"), Some(25));
        assert_eq!(top_percent(&totals, "click"), Some(50));
        assert_eq!(top_percent(&totals, "tiny"), Some(100));
        assert_eq!(top_percent(&totals, "missing"), None);
    }

    #[test]
    fn ties_pick_the_lowest_version() {
        let downloads = ProjectDownloads {
            versions: [("1.0".to_string(), 5), ("2.0".to_string(), 7), ("3.0".to_string(), 7)]
                .into_iter()
                .collect(),
        };
        assert_eq!(downloads.most_downloaded(), Some(("2.0", 7)));
        assert_eq!(downloads.total(), 19);
    }
}
