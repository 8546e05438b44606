// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Handlers built on GitHub: the link between a project and its repository,
//! and the repository facts derived from that link.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::domain::{
    Justification, NameRegistry, Prescription, PrescriptionKey, PrescriptionPath, Severity, Unit,
    dependency,
};
use crate::error::Result;
use crate::handlers::{Handler, HandlerKind, PrescriptionSink, Services, skip_item};
use crate::services::github::RepoSlug;
use crate::services::repository::LinkedProject;

pub const GH_LINK_FILE: &str = "gh_link.yaml";

/// Links a project to the GitHub repository its package metadata points at.
pub struct GhLink {
    services: Arc<Services>,
}

impl GhLink {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// First candidate URL that resolves to a live GitHub repository,
    /// after redirects.
    async fn live_url(&self, project: &str) -> Result<Option<String>> {
        let Some(info) = self.services.pypi.project(project).await? else {
            info!(project, "package not found on PyPI");
            return Ok(None);
        };

        for candidate in info.info.url_candidates() {
            let Some(path) = repository_path(candidate) else {
                debug!(url = candidate, "not a GitHub repository URL");
                continue;
            };
            match self.services.github.web_head(&path).await {
                Ok(Some(url)) => return Ok(Some(url)),
                Ok(None) => debug!(url = candidate, "GitHub repository does not exist"),
                Err(e) if e.is_item_failure() => {
                    debug!(url = candidate, error = %e, "cannot check GitHub URL")
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn evaluate(&self, names: &mut NameRegistry, project: &str) -> Result<Prescription> {
        let path = PrescriptionPath::new(project, GH_LINK_FILE);
        let Some(url) = self.live_url(project).await? else {
            info!(project, "no GitHub URL associated");
            return Ok(Prescription::retraction(
                path,
                format!("GitHub URL for '{project}' is not active anymore"),
            ));
        };

        let name = names.name(self.kind().id(), &PrescriptionKey::new(project))?;
        let unit = Unit::wrap(name)
            .matching(dependency(project, None, None))
            .justification(
                Justification::info(format!("Package '{project}' is hosted on GitHub"))
                    .link(url)
                    .field("package_name", project),
            );
        Ok(Prescription::new(path, format!("Package '{project}' is hosted on GitHub")).with_unit(unit))
    }
}

/// `owner/repo` of a `github.com` URL; deeper paths are cut to the
/// repository.
fn repository_path(candidate: &str) -> Option<String> {
    let url = Url::parse(candidate.trim()).ok()?;
    if !matches!(url.host_str()?, "github.com" | "www.github.com") {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    Some(format!("{owner}/{repo}"))
}

#[async_trait]
impl Handler for GhLink {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GhLink
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        for project in self.services.repository.projects()? {
            match self.evaluate(names, &project).await {
                Ok(prescription) => sink.emit(prescription).await?,
                Err(e) => skip_item(self.kind(), &project, e)?,
            }
        }
        Ok(())
    }
}

/// Facts about the repositories recorded in `gh_link.yaml` documents.
pub struct LinkedRepository {
    kind: HandlerKind,
    services: Arc<Services>,
}

impl LinkedRepository {
    pub fn new(kind: HandlerKind, services: Arc<Services>) -> Self {
        Self { kind, services }
    }

    fn file_name(&self) -> &'static str {
        match self.kind {
            HandlerKind::GhArchived => "gh_archived.yaml",
            HandlerKind::GhForked => "gh_forked.yaml",
            HandlerKind::GhPopularity => "gh_popularity.yaml",
            HandlerKind::GhUpdated => "gh_updated.yaml",
            HandlerKind::GhContributors => "gh_contributors.yaml",
            _ => "gh_release_notes.yaml",
        }
    }

    /// Warning wrap matching any version of the project.
    fn wrap(
        &self,
        names: &mut NameRegistry,
        linked: &LinkedProject,
        severity: Severity,
        message: String,
    ) -> Result<Unit> {
        let project = linked.project.as_str();
        let name = names.name(self.kind.id(), &PrescriptionKey::new(project))?;
        Ok(Unit::wrap(name)
            .matching(dependency(project, None, None))
            .justification(
                Justification::new(severity, message)
                    .link(linked.slug.web_url())
                    .field("package_name", project),
            )
            .provenance(self.services.provenance()))
    }

    fn document(&self, linked: &LinkedProject, summary: String, unit: Unit) -> Prescription {
        Prescription::new(self.path(linked), summary).with_unit(unit)
    }

    fn retraction(&self, linked: &LinkedProject, summary: String) -> Prescription {
        Prescription::retraction(self.path(linked), summary)
    }

    fn path(&self, linked: &LinkedProject) -> PrescriptionPath {
        PrescriptionPath::new(&linked.project, self.file_name())
    }

    /// `None` leaves the project's document as it is.
    async fn evaluate(
        &self,
        names: &mut NameRegistry,
        linked: &LinkedProject,
    ) -> Result<Option<Prescription>> {
        match self.kind {
            HandlerKind::GhArchived | HandlerKind::GhForked | HandlerKind::GhPopularity => {
                self.repository_facts(names, linked).await
            }
            HandlerKind::GhUpdated => self.updated(names, linked).await,
            HandlerKind::GhContributors => self.contributors(names, linked).await,
            _ => self.release_notes(names, linked).await,
        }
    }

    async fn repository_facts(
        &self,
        names: &mut NameRegistry,
        linked: &LinkedProject,
    ) -> Result<Option<Prescription>> {
        let project = linked.project.as_str();
        let Some(info) = self.services.github.repository(&linked.slug).await? else {
            debug!(project, slug = %linked.slug, "repository not found");
            return Ok(None);
        };

        let prescription = match self.kind {
            HandlerKind::GhArchived if info.archived => {
                let unit = self.wrap(
                    names,
                    linked,
                    Severity::Warning,
                    format!("Package '{project}' is marked as archived on GitHub"),
                )?;
                self.document(
                    linked,
                    format!("Repository for '{project}' is marked as archived on GitHub"),
                    unit,
                )
            }
            HandlerKind::GhArchived => self.retraction(
                linked,
                format!("Repository for '{project}' is no longer marked as archived on GitHub"),
            ),
            HandlerKind::GhForked if info.fork => {
                let unit = self.wrap(
                    names,
                    linked,
                    Severity::Warning,
                    format!("Package '{project}' is a GitHub fork"),
                )?;
                self.document(linked, format!("Project '{project}' is a fork on GitHub"), unit)
            }
            HandlerKind::GhForked => self.retraction(
                linked,
                format!("Project '{project}' is no longer a fork on GitHub"),
            ),
            _ => {
                let config = &self.services.config;
                let (level, severity) = popularity(
                    info.popularity_score(),
                    [
                        config.gh_popularity_low,
                        config.gh_popularity_moderate,
                        config.gh_popularity_high,
                    ],
                );
                let unit = self.wrap(
                    names,
                    linked,
                    severity,
                    format!("Project '{project}' has {level} popularity on GitHub"),
                )?;
                self.document(
                    linked,
                    format!("Update of GitHub popularity statistics for project '{project}'"),
                    unit,
                )
            }
        };
        Ok(Some(prescription))
    }

    async fn updated(
        &self,
        names: &mut NameRegistry,
        linked: &LinkedProject,
    ) -> Result<Option<Prescription>> {
        let project = linked.project.as_str();
        let Some(last_commit) = self.services.github.last_commit_date(&linked.slug).await? else {
            debug!(project, "no commits found");
            return Ok(None);
        };

        let days = self.services.config.gh_updated_days;
        if last_commit >= Utc::now() - Duration::days(days) {
            return Ok(Some(
                self.retraction(linked, format!("Project '{project}' was updated")),
            ));
        }

        let unit = self.wrap(
            names,
            linked,
            Severity::Warning,
            format!(
                "Package '{project}' was last updated at {}",
                last_commit.format("%Y-%m-%d %H:%M:%S")
            ),
        )?;
        Ok(Some(self.document(
            linked,
            format!("Project '{project}' was not updated for more than {days} days"),
            unit,
        )))
    }

    async fn contributors(
        &self,
        names: &mut NameRegistry,
        linked: &LinkedProject,
    ) -> Result<Option<Prescription>> {
        let project = linked.project.as_str();
        let threshold = self.services.config.gh_contributors_count;
        let Some(count) = self
            .services
            .github
            .contributors(&linked.slug, threshold)
            .await?
        else {
            debug!(project, slug = %linked.slug, "repository not found");
            return Ok(None);
        };

        if count >= threshold {
            return Ok(Some(self.retraction(
                linked,
                format!("Number of contributors to '{project}' is now at least {threshold}"),
            )));
        }

        let unit = self.wrap(
            names,
            linked,
            Severity::Warning,
            format!("Package '{project}' has less than {threshold} contributors on GitHub"),
        )?;
        Ok(Some(self.document(
            linked,
            format!("Project '{project}' has less than {threshold} contributors on GitHub"),
            unit,
        )))
    }

    /// Release notes are recorded when the newest release has a GitHub
    /// release tag, with or without a `v` prefix.
    async fn release_notes(
        &self,
        names: &mut NameRegistry,
        linked: &LinkedProject,
    ) -> Result<Option<Prescription>> {
        let project = linked.project.as_str();
        let Some(info) = self.services.pypi.project(project).await? else {
            info!(project, "package not found on PyPI");
            return Ok(None);
        };
        let Some(version) = info.newest_release() else {
            info!(project, "no release on PyPI");
            return Ok(None);
        };

        let slug = &linked.slug;
        let mut prefix = None;
        let mut found = false;
        for candidate in ["", "v"] {
            let path = format!("{}/{}/releases/tag/{candidate}{version}", slug.owner, slug.repo);
            if self.services.github.web_head(&path).await?.is_some() {
                prefix = Some(candidate).filter(|p| !p.is_empty());
                found = true;
                break;
            }
        }

        if !found {
            info!(project, version, "no GitHub release notes detected");
            return Ok(None);
        }

        Ok(Some(self.document(
            linked,
            format!("Project '{project}' hosts release notes on GitHub"),
            release_notes_unit(names, linked, prefix, self.services.provenance())?,
        )))
    }
}

fn release_notes_unit(
    names: &mut NameRegistry,
    linked: &LinkedProject,
    tag_prefix: Option<&str>,
    provenance: &str,
) -> Result<Unit> {
    let project = linked.project.as_str();
    let RepoSlug { owner, repo } = &linked.slug;
    let mut release_notes = json!({ "organization": owner, "repository": repo });
    if let Some(prefix) = tag_prefix {
        release_notes["tag_version_prefix"] = prefix.into();
    }

    let name = names.name(
        HandlerKind::GhReleaseNotes.id(),
        &PrescriptionKey::new(project),
    )?;
    Ok(Unit::wrap(name)
        .type_name("wrap.GHReleaseNotes")
        .matching(dependency(project, None, None))
        .run("release_notes", release_notes)
        .provenance(provenance))
}

/// Popularity level of `score` against increasing `[low, moderate, high]`
/// thresholds; only low popularity is a warning.
pub fn popularity(score: u64, [low, moderate, high]: [u64; 3]) -> (&'static str, Severity) {
    if score < low {
        ("low", Severity::Warning)
    } else if score < moderate {
        ("moderate", Severity::Info)
    } else if score < high {
        ("high", Severity::Info)
    } else {
        ("very high", Severity::Info)
    }
}

#[async_trait]
impl Handler for LinkedRepository {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        for linked in self.services.repository.linked_projects()? {
            match self.evaluate(names, &linked).await {
                Ok(Some(prescription)) => sink.emit(prescription).await?,
                Ok(None) => {}
                Err(e) => skip_item(self.kind, &linked.project, e)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_path_keeps_owner_and_repo() {
        assert_eq!(
            repository_path("https://github.com/pallets/flask/issues").as_deref(),
            Some("pallets/flask")
        );
        assert_eq!(repository_path("https://github.com/pallets"), None);
        assert_eq!(
            repository_path("http://www.github.com/psf/requests").as_deref(),
            Some("psf/requests")
        );
        assert_eq!(repository_path("https://gitlab.com/a/b"), None);
        assert_eq!(repository_path("https://github.com.example.org/a/b"), None);
        assert_eq!(repository_path("https://gist.github.com/a/b"), None);
        assert_eq!(repository_path("not a url"), None);
    }

    #[test]
    fn popularity_levels() {
        let thresholds = [20, 100, 1000];
        assert_eq!(popularity(5, thresholds), ("low", Severity::Warning));
        assert_eq!(popularity(20, thresholds), ("moderate", Severity::Info));
        assert_eq!(popularity(999, thresholds), ("high", Severity::Info));
        assert_eq!(popularity(1000, thresholds), ("very high", Severity::Info));
    }
}
