// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

mod helpers;

use std::path::Path;
use std::process::Command;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prescriptions_refresh::domain::{
    ChangeSet, Justification, NameRegistry, Prescription, PrescriptionKey, PrescriptionPath, Unit,
    dependency,
};
use prescriptions_refresh::handlers::HandlerKind;
use prescriptions_refresh::services::git::GitService;
use prescriptions_refresh::services::submit::{SubmitOutcome, Submission, body};
use prescriptions_refresh::services::writer::PrescriptionWriter;

const REPO: &str = "/repos/thoth-station/prescriptions";

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare origin and a working copy with one commit on `main`.
fn working_copy() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let origin = dir.path().join("origin.git");
    let work = dir.path().join("work");
    git(dir.path(), &["init", "--quiet", "--bare", "--initial-branch=main", "origin.git"]);
    git(dir.path(), &["clone", "--quiet", "origin.git", "work"]);
    git(&work, &["checkout", "--quiet", "-B", "main"]);
    std::fs::write(work.join("README.md"), "prescriptions\n").unwrap();
    git(&work, &["add", "README.md"]);
    git(&work, &["commit", "--quiet", "-m", "initial"]);
    git(&work, &["push", "--quiet", "origin", "main"]);
    (dir, origin, work)
}

fn changes(root: &Path) -> ChangeSet {
    let mut names = NameRegistry::new();
    let name = names
        .name("gh-archived", &PrescriptionKey::new("flask"))
        .unwrap();
    let document = Prescription::new(
        PrescriptionPath::new("flask", "gh_archived.yaml"),
        "Repository for 'flask' is marked as archived on GitHub",
    )
    .with_unit(
        Unit::wrap(name)
            .matching(dependency("flask", None, None))
            .justification(Justification::warning("archived")),
    );
    let mut writer = PrescriptionWriter::new(root, false);
    writer.write(&document, "gh-archived").unwrap();
    writer.into_changes()
}

async fn mount_default_branch(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(REPO))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "default_branch": "main" })))
        .mount(server)
        .await;
}

// ─── Pull requests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn changes_are_pushed_and_proposed() {
    let server = MockServer::start().await;
    mount_default_branch(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("{REPO}/pulls")))
        .and(body_partial_json(json!({
            "title": "💊 Prescriptions refresh: gh-archived",
            "head": "prescriptions-refresh/gh-archived",
            "base": "main"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "number": 7,
            "html_url": "https://github.com/thoth-station/prescriptions/pull/7"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REPO}/issues/7/labels")))
        .and(body_partial_json(json!({ "labels": ["bot"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, origin, work) = working_copy();
    let config = helpers::mock_config(&server.uri());
    let services = helpers::services(&work, helpers::mock_config(&server.uri()));
    let git_service = GitService::open(&work).unwrap();
    let changes = changes(&work);

    let outcome = Submission::new(&git_service, &services.github, &config)
        .submit(&[HandlerKind::GhArchived], &changes)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Submitted {
            number: 7,
            url: "https://github.com/thoth-station/prescriptions/pull/7".into(),
            created: true,
        }
    );

    let subject = git(
        &origin,
        &["log", "-1", "--format=%s", "prescriptions-refresh/gh-archived"],
    );
    assert_eq!(subject, "💊 Prescriptions refresh: gh-archived");
    let files = git(
        &origin,
        &["show", "--name-only", "--format=", "prescriptions-refresh/gh-archived"],
    );
    assert_eq!(files, "prescriptions/fl_/flask/gh_archived.yaml");
}

#[tokio::test]
async fn existing_pull_request_is_updated() {
    let server = MockServer::start().await;
    mount_default_branch(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("{REPO}/pulls")))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Validation Failed",
            "errors": [{ "message": "A pull request already exists for thoth-station:prescriptions-refresh/gh-archived." }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{REPO}/pulls")))
        .and(query_param("state", "open"))
        .and(query_param("head", "thoth-station:prescriptions-refresh/gh-archived"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "number": 3,
            "html_url": "https://github.com/thoth-station/prescriptions/pull/3"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{REPO}/pulls/3")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "number": 3,
            "html_url": "https://github.com/thoth-station/prescriptions/pull/3"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REPO}/issues/3/labels")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (_dir, _origin, work) = working_copy();
    let config = helpers::mock_config(&server.uri());
    let services = helpers::services(&work, helpers::mock_config(&server.uri()));
    let git_service = GitService::open(&work).unwrap();
    let changes = changes(&work);

    let outcome = Submission::new(&git_service, &services.github, &config)
        .submit(&[HandlerKind::GhArchived], &changes)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Submitted {
            number: 3,
            created: false,
            ..
        }
    ));
}

#[tokio::test]
async fn empty_change_set_submits_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (_dir, origin, work) = working_copy();
    let config = helpers::mock_config(&server.uri());
    let services = helpers::services(&work, helpers::mock_config(&server.uri()));
    let git_service = GitService::open(&work).unwrap();

    let outcome = Submission::new(&git_service, &services.github, &config)
        .submit(&[HandlerKind::GhArchived], &ChangeSet::new())
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::NoChanges);
    let branches = git(&origin, &["branch", "--list"]);
    assert!(!branches.contains("prescriptions-refresh"));
}

// ─── Description ─────────────────────────────────────────────────────────────

#[test]
fn body_lists_changes_and_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let changes = changes(dir.path());
    let text = body(&changes, Some("ocp4-stage"));
    assert!(text.starts_with("This change was automatically generated"));
    assert!(text.contains(
        "- `prescriptions/fl_/flask/gh_archived.yaml` (added, gh-archived): Repository for 'flask' is marked as archived on GitHub"
    ));
    assert!(text.ends_with("Deployment: `ocp4-stage`\n"));
}
