//! CLI argument parsing tests for relay

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command instance with the relay binary
fn relay() -> Command {
    Command::new(env!("CARGO_BIN_EXE_relay"))
}

#[test]
fn test_help_flag() {
    let mut cmd = relay();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("A resumable task execution agent"))
        .stdout(predicate::str::contains("--help"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_version_flag() {
    let mut cmd = relay();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_no_args_shows_help() {
    let mut cmd = relay();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

// ============================================================================
// Init command tests
// ============================================================================

#[test]
fn test_init_command_help() {
    let mut cmd = relay();
    cmd.args(["init", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Initialize"));
}

// ============================================================================
// Start command tests
// ============================================================================

#[test]
fn test_start_command_help() {
    let mut cmd = relay();
    cmd.args(["start", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Start a new task"))
        .stdout(predicate::str::contains("-d, --dir"))
        .stdout(predicate::str::contains("-p, --permission"))
        .stdout(predicate::str::contains("-v, --verbose"));
}

#[test]
fn test_start_requires_description() {
    let mut cmd = relay();
    cmd.arg("start");
    cmd.assert().failure();
}

// Note: start/resume drive a task against the oracle, so we only test
// the args parsing via --help to avoid network calls and hangs

// ============================================================================
// Resume command tests
// ============================================================================

#[test]
fn test_resume_command_help() {
    let mut cmd = relay();
    cmd.args(["resume", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Resume a paused"))
        .stdout(predicate::str::contains("-v, --verbose"));
}

#[test]
fn test_resume_requires_task_id() {
    let mut cmd = relay();
    cmd.arg("resume");
    cmd.assert().failure();
}

// ============================================================================
// Status command tests
// ============================================================================

#[test]
fn test_status_command_help() {
    let mut cmd = relay();
    cmd.args(["status", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Show the state of a task"));
}

#[test]
fn test_status_requires_task_id() {
    let mut cmd = relay();
    cmd.arg("status");
    cmd.assert().failure();
}

#[test]
fn test_status_unknown_task_fails() {
    let mut cmd = relay();
    cmd.args(["status", "no-such-task-id"]);
    cmd.assert().failure();
}

// ============================================================================
// List command tests
// ============================================================================

#[test]
fn test_list_command_help() {
    let mut cmd = relay();
    cmd.args(["list", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("List all known tasks"));
}

#[test]
fn test_list_runs() {
    let mut cmd = relay();
    cmd.arg("list");
    cmd.assert().success();
}

// ============================================================================
// Delete command tests
// ============================================================================

#[test]
fn test_delete_command_help() {
    let mut cmd = relay();
    cmd.args(["delete", "--help"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Delete a task's checkpoint"));
}

#[test]
fn test_delete_unknown_task_reports_not_found() {
    let mut cmd = relay();
    cmd.args(["delete", "no-such-task-id"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("not found"));
}

// ============================================================================
// Invalid command tests
// ============================================================================

#[test]
fn test_invalid_command() {
    let mut cmd = relay();
    cmd.arg("invalid-command");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_invalid_flag() {
    let mut cmd = relay();
    cmd.args(["init", "--invalid-flag"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
