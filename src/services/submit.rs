// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! Turns a run's change set into one commit and one pull request.

use std::fmt::Write as _;

use tracing::{info, warn};

use crate::config::Config;
use crate::domain::ChangeSet;
use crate::error::{Error, Result};
use crate::handlers::HandlerKind;
use crate::services::git::GitService;
use crate::services::github::{GitHub, PullRequest, RepoSlug};

pub const BRANCH_PREFIX: &str = "prescriptions-refresh";

const PR_PREAMBLE: &str = "This change was automatically generated using \
[thoth-station/prescriptions-refresh-job](https://github.com/thoth-station/prescriptions-refresh-job). \
This periodic job makes sure the repository is up to date. \
Visit [thoth-station.ninja](https://thoth-station.ninja) for more info.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    NoChanges,
    Submitted {
        number: u64,
        url: String,
        /// `false` when an open pull request for the branch was updated
        created: bool,
    },
}

/// `prescriptions-refresh/<handler ids>`, stable for a handler selection.
pub fn branch_name(handlers: &[HandlerKind]) -> String {
    let ids: Vec<&str> = handlers.iter().map(HandlerKind::id).collect();
    format!("{BRANCH_PREFIX}/{}", ids.join("-"))
}

pub fn title(handlers: &[HandlerKind]) -> String {
    let ids: Vec<&str> = handlers.iter().map(HandlerKind::id).collect();
    format!("💊 Prescriptions refresh: {}", ids.join(", "))
}

/// Preamble, changed files sorted by path, and the deployment if known.
pub fn body(changes: &ChangeSet, deployment: Option<&str>) -> String {
    let mut body = String::from(PR_PREAMBLE);
    body.push_str("\n\n### Changes\n\n");
    for change in changes.iter() {
        let _ = writeln!(
            body,
            "- `{}` ({}, {}): {}",
            change.path, change.status, change.handler, change.summary
        );
    }
    if let Some(deployment) = deployment.filter(|d| !d.is_empty()) {
        let _ = write!(body, "\nDeployment: `{deployment}`\n");
    }
    body
}

pub struct Submission<'a> {
    git: &'a GitService,
    github: &'a GitHub,
    config: &'a Config,
}

impl<'a> Submission<'a> {
    pub fn new(git: &'a GitService, github: &'a GitHub, config: &'a Config) -> Self {
        Self {
            git,
            github,
            config,
        }
    }

    fn slug(&self) -> Result<RepoSlug> {
        RepoSlug::parse_remote(&self.config.repo).ok_or_else(|| {
            Error::Config(format!(
                "cannot tell the GitHub repository from '{}'",
                self.config.repo
            ))
        })
    }

    /// Commit, push and open or update the pull request. An empty change
    /// set touches neither git nor GitHub.
    pub async fn submit(&self, handlers: &[HandlerKind], changes: &ChangeSet) -> Result<SubmitOutcome> {
        if changes.is_empty() {
            info!("no changes to submit");
            return Ok(SubmitOutcome::NoChanges);
        }

        let slug = self.slug()?;
        let branch = branch_name(handlers);
        let title = title(handlers);
        let body = body(changes, self.config.deployment_name.as_deref());

        let paths: Vec<&std::path::Path> = changes.iter().map(|c| c.path.as_path()).collect();
        self.git.checkout_branch(&branch)?;
        self.git.add(&paths)?;
        self.git.commit(
            &title,
            &self.config.git_author_name,
            &self.config.git_author_email,
        )?;
        self.git.push(&branch)?;
        info!(branch = %branch, files = changes.len(), "pushed changes");

        let base = self.github.default_branch(&slug).await?;
        let (pull, created) = match self
            .github
            .create_pull(&slug, &title, &body, &branch, &base)
            .await?
        {
            Some(pull) => (pull, true),
            None => (self.update_existing(&slug, &branch, &title, &body).await?, false),
        };

        let labels = self.config.labels();
        if !labels.is_empty()
            && let Err(e) = self.github.add_labels(&slug, pull.number, &labels).await
        {
            warn!(number = pull.number, error = %e, "failed to add labels to the pull request");
        }

        info!(number = pull.number, url = %pull.html_url, created, "pull request ready");
        Ok(SubmitOutcome::Submitted {
            number: pull.number,
            url: pull.html_url,
            created,
        })
    }

    async fn update_existing(
        &self,
        slug: &RepoSlug,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let Some(existing) = self.github.find_open_pull(slug, branch).await? else {
            return Err(Error::Submission(format!(
                "a pull request for {branch} exists but none is open"
            )));
        };
        warn!(number = existing.number, "pull request already exists, updating it");
        self.github
            .update_pull(slug, existing.number, title, body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_follows_handler_order() {
        assert_eq!(
            branch_name(&[HandlerKind::GhLink, HandlerKind::Scorecards]),
            "prescriptions-refresh/gh-link-scorecards"
        );
    }
}
