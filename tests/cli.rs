// SPDX-FileCopyrightText: 2026 Sephyi <me@sephy.io>
//
// SPDX-License-Identifier: GPL-3.0-only

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with a clean home and no inherited settings.
fn command(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("prescriptions-refresh").unwrap();
    cmd.env_clear()
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("NO_COLOR", "1")
        .current_dir(home.path());
    cmd
}

// ─── Informational commands ──────────────────────────────────────────────────

#[test]
fn help_lists_subcommands() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn list_shows_every_handler() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("gh-release-notes"))
        .stdout(predicate::str::contains("quay-security"))
        .stdout(predicate::str::contains("scorecards"));
}

#[test]
fn config_hides_secrets() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .arg("config")
        .env("THOTH_PRESCRIPTIONS_REFRESH_GITHUB_TOKEN", "ghp_do_not_print")
        .env("THOTH_PRESCRIPTIONS_REFRESH_PYPI_RELEASE_DAYS", "42")
        .assert()
        .success()
        .stdout(predicate::str::contains("pypi_release_days = 42"))
        .stdout(predicate::str::contains("ghp_do_not_print").not());
}

#[test]
fn completions_are_generated() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prescriptions-refresh"));
}

// ─── Run ─────────────────────────────────────────────────────────────────────

#[test]
fn run_without_handlers_fails() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .args(["run", "--dry-run"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No handlers selected"));
}

#[test]
fn unknown_handler_is_rejected_by_the_parser() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .args(["run", "gh-link,statistics"])
        .assert()
        .code(2);
}

#[test]
fn missing_config_file_is_an_error() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .args(["--config", "does-not-exist.toml", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn quay_handler_needs_a_token() {
    let home = tempfile::tempdir().unwrap();
    command(&home)
        .args(["run", "--dry-run", "quay-security"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("THOTH_PRESCRIPTIONS_REFRESH_QUAY_TOKEN"));
}
