// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

//! OpenSSF Security Scorecards for projects linked to GitHub.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::domain::{
    Justification, NameRegistry, Prescription, PrescriptionKey, PrescriptionPath, Record,
    Severity, Unit, dependency,
};
use crate::error::Result;
use crate::handlers::{Handler, HandlerKind, PrescriptionSink, Services, skip_item};
use crate::services::repository::LinkedProject;
use crate::services::warehouse::{Query, QueryParameter};

const CHECKS_LINK: &str = "https://github.com/ossf/scorecard/blob/main/docs/checks.md";
const ORIGIN: &str = "scorecards";

const SCORECARD_QUERY: &str = "\
SELECT date, repo, checks
FROM `openssf.scorecardcron.scorecard-v2`
WHERE repo.name = @repo
  AND date > DATE_SUB(CURRENT_DATE(), INTERVAL @weeks WEEK)
ORDER BY date DESC
LIMIT 1";

/// How a scorecard check is turned into a prescription.
#[derive(Debug)]
pub struct CheckRule {
    /// Check names as published, older aliases included
    pub names: &'static [&'static str],
    pub title: &'static str,
    /// `scorecards_<file>.yaml`
    pub file: &'static str,
    pub tag: &'static str,
    /// The tag describes a bad property, so passing earns the `no-` prefix
    pub inverted: bool,
    pub passed: &'static str,
    pub failed: &'static str,
}

/// The scorecard's own reason is the message.
const FROM_REASON: &str = "";

pub const RULES: &[CheckRule] = &[
    CheckRule {
        names: &["Active", "Maintained"],
        title: "Active",
        file: "active",
        tag: "actively-maintained",
        inverted: false,
        passed: "Project is actively maintained based on Security Scorecards",
        failed: "Project is NOT actively maintained based on Security Scorecards",
    },
    CheckRule {
        names: &["Automatic-Dependency-Update", "Dependency-Update-Tool"],
        title: "Automatic-Dependency-Update",
        file: "automatic_dependency_update",
        tag: "automatic-updates",
        inverted: false,
        passed: "Project uses tools for automatic dependency updates based on Security Scorecards",
        failed: "Project does NOT use tools for automatic dependency updates based on Security Scorecards",
    },
    CheckRule {
        names: &["Binary-Artifacts"],
        title: "Binary-Artifacts",
        file: "binary_artifacts",
        tag: "binary-artifacts",
        inverted: true,
        passed: "Project does not have binary artifacts in the source repository",
        failed: "Project has binary artifacts in the source repository",
    },
    CheckRule {
        names: &["Branch-Protection"],
        title: "Branch-Protection",
        file: "branch_protection",
        tag: "branch-protection",
        inverted: false,
        passed: "Project has branch protection setup based on Security Scorecards",
        failed: "Project does NOT have branch protection setup based on Security Scorecards",
    },
    CheckRule {
        names: &["CI-Tests"],
        title: "CI-Tests",
        file: "ci_tests",
        tag: "ci-tests",
        inverted: false,
        passed: "Project runs CI tests before pull requests are merged based on Security Scorecards",
        failed: "Project does NOT run CI tests before pull requests are merged based on Security Scorecards",
    },
    CheckRule {
        names: &["CII-Best-Practices"],
        title: "CII-Best-Practices",
        file: "cii_best_practices",
        tag: "cii",
        inverted: false,
        passed: "Project honours CII Best Practices based on Security Scorecards",
        failed: "Project does NOT honour CII Best Practices based on Security Scorecards",
    },
    CheckRule {
        names: &["Code-Review"],
        title: "Code-Review",
        file: "code_review",
        tag: "code-review",
        inverted: false,
        passed: FROM_REASON,
        failed: FROM_REASON,
    },
    CheckRule {
        names: &["Contributors"],
        title: "Contributors",
        file: "contributors",
        tag: "multiple-companies-contributors",
        inverted: false,
        passed: "Project has a set of contributors from multiple companies based on Security Scorecards",
        failed: "Project does NOT have a set of contributors from multiple companies based on Security Scorecards",
    },
    CheckRule {
        names: &["Dangerous-Workflow"],
        title: "Dangerous-Workflow",
        file: "dangerous_workflow",
        tag: "dangerous-patterns",
        inverted: true,
        passed: "Project GitHub Action workflows do not have dangerous code patterns based on Security Scorecards",
        failed: "Project GitHub Action workflows have dangerous code patterns based on Security Scorecards",
    },
    CheckRule {
        names: &["Fuzzing"],
        title: "Fuzzing",
        file: "fuzzing",
        tag: "fuzzing",
        inverted: false,
        passed: "Project uses fuzzing based on Security Scorecards",
        failed: "Project does not use fuzzing based on Security Scorecards",
    },
    CheckRule {
        names: &["License"],
        title: "Licence",
        file: "licence",
        tag: "license",
        inverted: false,
        passed: "Project has published a license based on Security Scorecards",
        failed: "Project has NOT published a license based on Security Scorecards",
    },
    CheckRule {
        names: &["Packaging"],
        title: "Packaging",
        file: "packaging",
        tag: "published-package",
        inverted: false,
        passed: "Project is published as a package based on Security Scorecards",
        failed: "Project is NOT published as a package based on Security Scorecards",
    },
    CheckRule {
        names: &["Pinned-Dependencies", "Frozen-Deps", "Frozen-Dependencies"],
        title: "Pinned-Dependencies",
        file: "pinned_dependencies",
        tag: "pinned-dependencies",
        inverted: false,
        passed: "Project uses pinned dependencies based on Security Scorecards",
        failed: "Project does NOT use pinned dependencies based on Security Scorecards",
    },
    CheckRule {
        names: &["SAST"],
        title: "SAST",
        file: "sast",
        tag: "static-analysis",
        inverted: false,
        passed: "Project uses static source code analysis based on Security Scorecards",
        failed: "Project does NOT use static source code analysis based on Security Scorecards",
    },
    CheckRule {
        names: &["Security-Policy"],
        title: "Security-Policy",
        file: "security_policy",
        tag: "security-policy",
        inverted: false,
        passed: "Project has a security policy published based on Security Scorecards",
        failed: "Project does not have any security policy published based on Security Scorecards",
    },
    CheckRule {
        names: &["Signed-Releases"],
        title: "Signed-Releases",
        file: "signed_releases",
        tag: "signed-releases",
        inverted: false,
        passed: "Project cryptographically signs released artifacts based on Security Scorecards",
        failed: "Project does NOT cryptographically sign released artifacts based on Security Scorecards",
    },
    CheckRule {
        names: &["Signed-Tags"],
        title: "Signed-Tags",
        file: "signed_tags",
        tag: "cryptographically-signed",
        inverted: false,
        passed: "Project cryptographically signs tags based on Security Scorecards",
        failed: "Project does NOT cryptographically sign tags based on Security Scorecards",
    },
    CheckRule {
        names: &["Token-Permissions"],
        title: "Token-Permissions",
        file: "token_permissions",
        tag: "least-privileged-workflow",
        inverted: false,
        passed: "Project follows the principle of least privileged in GitHub workflows based on Security Scorecards",
        failed: "Project does NOT follow the principle of least privileged in GitHub workflows based on Security Scorecards",
    },
    CheckRule {
        names: &["Vulnerabilities"],
        title: "Vulnerabilities",
        file: "vulnerabilities",
        tag: "unfixed-vulnerabilities",
        inverted: true,
        passed: "Project does not have open or unfixed vulnerabilities on the OSV service based on Security Scorecards",
        failed: "Project has open or unfixed vulnerabilities on the Open Source Vulnerabilities based on Security Scorecards",
    },
    CheckRule {
        names: &["Webhooks"],
        title: "Webhooks",
        file: "webhooks",
        tag: "webhook-token",
        inverted: false,
        passed: "The webhook defined in the project repository has a token configured to authenticate the origins of requests based on Security Scorecards",
        failed: "The webhook defined in the project repository does NOT have a token configured to authenticate the origins of requests based on Security Scorecards",
    },
];

pub fn rule_for(check: &str) -> Option<&'static CheckRule> {
    RULES.iter().find(|rule| rule.names.contains(&check))
}

/// One entry of a scorecard's `checks` column.
#[derive(Debug, Clone, Deserialize)]
pub struct Check {
    pub name: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Check {
    /// Only a perfect score passes.
    pub fn severity(&self) -> Severity {
        match self.score {
            Some(10) => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl CheckRule {
    /// Justification message and tag for `check`.
    pub fn evaluate(&self, check: &Check) -> (String, String) {
        let passed = check.severity() == Severity::Info;
        let message = if self.passed.is_empty() {
            check.reason.clone().unwrap_or_default()
        } else if passed {
            self.passed.to_string()
        } else {
            self.failed.to_string()
        };
        let tag = if passed == self.inverted {
            format!("no-{}", self.tag)
        } else {
            self.tag.to_string()
        };
        (message, tag)
    }
}

/// The latest scorecard of one repository.
#[derive(Debug)]
struct Scorecard {
    url: String,
    revision: Option<String>,
    checks: Vec<Check>,
}

impl Scorecard {
    fn from_record(row: &Record) -> Result<Self> {
        let url = row.require_str(ORIGIN, "repo.name")?.to_string();
        let revision = row.str("repo.commit").map(String::from);
        let checks = match row.get("checks") {
            Some(checks) => serde_json::from_value(checks.clone())?,
            None => Vec::new(),
        };
        Ok(Self {
            url,
            revision,
            checks,
        })
    }
}

pub struct Scorecards {
    services: Arc<Services>,
}

impl Scorecards {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    async fn latest(&self, linked: &LinkedProject) -> Result<Option<Scorecard>> {
        let repo = format!("github.com/{}/{}", linked.slug.owner, linked.slug.repo);
        let weeks = self.services.config.scorecard_freshness_weeks;
        let query = Query::new(SCORECARD_QUERY)
            .param(QueryParameter::string("repo", repo.as_str()))
            .param(QueryParameter::int64("weeks", i64::from(weeks)))
            .label("query_target", "openssf-scorecards");

        let rows = self.services.warehouse.query(&query).await?.collect().await?;
        match rows.first() {
            Some(row) => {
                info!(project = %linked.project, repo = %repo, "scorecard found");
                Scorecard::from_record(row).map(Some)
            }
            None => {
                info!(project = %linked.project, repo = %repo, "no recent scorecard");
                Ok(None)
            }
        }
    }

    fn document(
        &self,
        names: &mut NameRegistry,
        project: &str,
        scorecard: &Scorecard,
        rule: &CheckRule,
        check: &Check,
    ) -> Result<Prescription> {
        let (message, tag) = rule.evaluate(check);
        let prefix = format!("scorecards-{}", rule.file.replace('_', "-"));
        let unit = Unit::wrap(names.name(&prefix, &PrescriptionKey::new(project))?)
            .matching(dependency(project, None, None))
            .justification(
                Justification::new(check.severity(), message)
                    .link(CHECKS_LINK)
                    .field("package_name", project)
                    .field("project_url", scorecard.url.as_str())
                    .field("project_revision", scorecard.revision.clone())
                    .field("scorecard_score", check.score.map_or(Value::Null, Value::from))
                    .field("tag", tag),
            )
            .provenance(self.services.provenance());

        Ok(Prescription::new(
            PrescriptionPath::new(project, &format!("scorecards_{}.yaml", rule.file)),
            format!("{} Security Scorecards update for '{project}'", rule.title),
        )
        .with_unit(unit))
    }
}

#[async_trait]
impl Handler for Scorecards {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Scorecards
    }

    async fn produce(&self, names: &mut NameRegistry, sink: &PrescriptionSink) -> Result<()> {
        for linked in self.services.repository.linked_projects()? {
            let scorecard = match self.latest(&linked).await {
                Ok(Some(scorecard)) => scorecard,
                Ok(None) => continue,
                Err(e) => {
                    skip_item(self.kind(), &linked.project, e)?;
                    continue;
                }
            };

            for check in &scorecard.checks {
                let Some(rule) = rule_for(&check.name) else {
                    error!(
                        project = %linked.project,
                        check = %check.name,
                        slug = %linked.slug,
                        "no rule registered for scorecard check"
                    );
                    continue;
                };
                let document = self.document(names, &linked.project, &scorecard, rule, check)?;
                sink.emit(document).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, score: Option<i64>) -> Check {
        Check {
            name: name.to_string(),
            score,
            reason: Some("found 3/10 approved changesets".to_string()),
        }
    }

    #[test]
    fn aliases_share_a_rule() {
        assert_eq!(rule_for("Maintained").map(|r| r.file), Some("active"));
        assert_eq!(rule_for("Frozen-Deps").map(|r| r.file), Some("pinned_dependencies"));
        assert!(rule_for("Unknown-Check").is_none());
    }

    #[test]
    fn failing_check_gets_negated_tag() {
        let rule = rule_for("Fuzzing").unwrap();
        let (message, tag) = rule.evaluate(&check("Fuzzing", Some(0)));
        assert_eq!(tag, "no-fuzzing");
        assert_eq!(message, "Project does not use fuzzing based on Security Scorecards");

        let (_, tag) = rule.evaluate(&check("Fuzzing", Some(10)));
        assert_eq!(tag, "fuzzing");
    }

    #[test]
    fn inverted_checks_negate_on_pass() {
        let rule = rule_for("Binary-Artifacts").unwrap();
        assert_eq!(rule.evaluate(&check("Binary-Artifacts", Some(10))).1, "no-binary-artifacts");
        assert_eq!(rule.evaluate(&check("Binary-Artifacts", None)).1, "binary-artifacts");
    }

    #[test]
    fn code_review_uses_the_reason() {
        let rule = rule_for("Code-Review").unwrap();
        let (message, tag) = rule.evaluate(&check("Code-Review", Some(3)));
        assert_eq!(message, "found 3/10 approved changesets");
        assert_eq!(tag, "no-code-review");
    }
}
