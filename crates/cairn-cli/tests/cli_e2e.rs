//! End-to-end CLI tests using `assert_cmd` against a local bare remote
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command as SysCommand;
use tempfile::TempDir;

/// Helper to get cargo binary or fail test
fn cargo_bin() -> Command {
    Command::cargo_bin("cairn").unwrap_or_else(|err| panic!("Binary not found: {err}"))
}

/// Helper to create temp dir or fail test
fn temp_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("Failed to create temp dir: {err}"))
}

/// Runs a git command in `dir`, panicking on failure
fn git(dir: &Path, args: &[&str]) {
    let output = SysCommand::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|err| panic!("Failed to spawn git: {err}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Creates a bare remote seeded with an empty `tasks/` subtree and returns
/// its `file://` URL
fn seed_remote(home: &Path) -> String {
    let bare = home.join("remote.git");
    fs::create_dir_all(&bare).unwrap_or_else(|err| panic!("Failed to create bare dir: {err}"));
    git(&bare, &["init", "--bare", "--initial-branch=main", "."]);
    // Shallow blob-filtered clones need the filter capability enabled
    git(&bare, &["config", "uploadpack.allowfilter", "true"]);
    let url = format!("file://{}", bare.display());

    let seed = home.join("seed");
    fs::create_dir_all(seed.join("tasks"))
        .unwrap_or_else(|err| panic!("Failed to create seed tree: {err}"));
    fs::write(seed.join("tasks").join(".gitkeep"), "")
        .unwrap_or_else(|err| panic!("Failed to write .gitkeep: {err}"));
    git(&seed, &["init", "--initial-branch=main", "."]);
    git(&seed, &["add", "."]);
    git(
        &seed,
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@localhost",
            "commit",
            "-m",
            "seed task data",
        ],
    );
    git(&seed, &["push", &url, "main"]);
    url
}

/// Command pre-wired with an isolated HOME, remote, and state dir
fn cairn(home: &Path, url: &str) -> Command {
    let mut cmd = cargo_bin();
    cmd.env("HOME", home)
        .args(["--remote", url, "--state-dir"])
        .arg(home.join("workspace"));
    cmd
}

#[test]
fn test_cli_help() {
    cargo_bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_invalid_command() {
    cargo_bin().arg("invalid-command-xyz").assert().failure();
}

#[test]
fn test_missing_remote_is_reported() {
    let home = temp_dir();

    cargo_bin()
        .env("HOME", home.path())
        .args(["task", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("remote_url"));
}

#[test]
fn test_workspace_status_before_first_sync() {
    let home = temp_dir();
    let url = seed_remote(home.path());

    cairn(home.path(), &url)
        .args(["workspace", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("uninitialized"));
}

#[test]
fn test_task_lifecycle_end_to_end() {
    let home = temp_dir();
    let url = seed_remote(home.path());

    cairn(home.path(), &url)
        .args(["task", "create", "Fix login flow"])
        .assert()
        .success()
        .stdout(predicate::str::contains("json#1").and(predicate::str::contains("Fix login flow")));

    cairn(home.path(), &url)
        .args(["task", "status", "json#1", "in-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("in progress"));

    // State persists across processes: a fresh invocation sees the task
    cairn(home.path(), &url)
        .args(["task", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[+] json#1"));

    cairn(home.path(), &url)
        .args(["workspace", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("healthy"));
}

#[test]
fn test_tree_renders_child_under_parent() {
    let home = temp_dir();
    let url = seed_remote(home.path());

    cairn(home.path(), &url)
        .args(["task", "create", "Epic"])
        .assert()
        .success();
    cairn(home.path(), &url)
        .args(["task", "create", "Subtask"])
        .assert()
        .success();

    cairn(home.path(), &url)
        .args(["rel", "add", "json#1", "parent", "json#2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("added"));

    cairn(home.path(), &url)
        .args(["tree", "json#1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Epic").and(predicate::str::contains("  [ ] json#2")));
}
