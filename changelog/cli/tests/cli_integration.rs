//! Integration tests for the changelog CLI.
//!
//! These tests verify argument handling and failure reporting using assert_cmd.
//! Nothing here reaches a real Gerrit or Gitiles host.

use assert_cmd::Command;
use predicates::prelude::*;

fn changelog_cmd() -> Command {
    let mut cmd = Command::cargo_bin("changelog").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("CHANGELOG_ACCESS_TOKEN")
        .env("CHANGELOG_REQUEST_TIMEOUT_SECS", "2");
    cmd
}

#[test]
fn cli_shows_help() {
    changelog_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Changelogs between COS builds"))
        .stdout(predicate::str::contains("changelog"))
        .stdout(predicate::str::contains("findbuild"))
        .stdout(predicate::str::contains("--gob"))
        .stdout(predicate::str::contains("--fallback"));
}

#[test]
fn cli_shows_version() {
    changelog_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("changelog 0.1.0"));
}

#[test]
fn changelog_help_lists_options() {
    changelog_cmd()
        .args(["changelog", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--query-size"))
        .stdout(predicate::str::contains("--output-dir"));
}

#[test]
fn changelog_requires_two_builds() {
    changelog_cmd()
        .args(["changelog", "15000.0.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<TARGET>"));
}

#[test]
fn findbuild_requires_cl() {
    changelog_cmd()
        .arg("findbuild")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<CL>"));
}

#[test]
fn rejects_non_numeric_query_size() {
    changelog_cmd()
        .args(["changelog", "1.0.0", "2.0.0", "--query-size", "lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn unreachable_gitiles_host_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    changelog_cmd()
        .args(["--gob", "http://127.0.0.1:9", "changelog", "1.0.0", "2.0.0", "--output-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: Internal Error"));

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn unreachable_gerrit_host_fails() {
    changelog_cmd()
        .args(["--gerrit", "http://127.0.0.1:9", "findbuild", "3206"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
