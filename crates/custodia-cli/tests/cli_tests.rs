//! Integration tests for the `custodia` CLI binary.
//!
//! These exercise the CLI as a subprocess against a nonexistent server,
//! checking argument parsing, help output, and error reporting. None of
//! them require a running Custodia server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

fn custodia_bin() -> String {
    let path = env!("CARGO_BIN_EXE_custodia");
    assert!(Path::new(path).exists(), "custodia binary not found at {path}");
    path.to_owned()
}

fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(custodia_bin())
        .args(args)
        .env("CUSTODIA_ADDR", "http://127.0.0.1:19999")
        .env_remove("CUSTODIA_AUTH_HEADER")
        .env_remove("CUSTODIA_AUTH_TOKEN")
        .output()
        .expect("failed to execute custodia");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "custodia --version should exit 0");
    assert!(stdout.contains("custodia"), "version output should contain 'custodia': {stdout}");
}

#[test]
fn test_help_flag() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "custodia --help should exit 0");
    assert!(stdout.contains("Custodia CLI"), "help should mention Custodia CLI");
    for sub in ["mkdir", "rmdir", "ls", "put", "get", "rm"] {
        assert!(stdout.contains(sub), "help should list '{sub}' command: {stdout}");
    }
}

#[test]
fn test_subcommand_help() {
    for sub in ["mkdir", "rmdir", "ls", "put", "get", "rm"] {
        let (code, stdout, _) = run(&[sub, "--help"]);
        assert_eq!(code, 0, "{sub} --help should exit 0");
        assert!(!stdout.is_empty(), "{sub} --help should produce output");
    }
}

#[test]
fn test_missing_path_argument_fails() {
    let (code, _, stderr) = run(&["get"]);
    assert_ne!(code, 0, "get with no path should fail");
    assert!(stderr.contains("required") || stderr.contains("error"), "stderr: {stderr}");
}

#[test]
fn test_get_unreachable_server_reports_error() {
    let (code, _, stderr) = run(&["get", "alice/db-password"]);
    assert_ne!(code, 0, "get against an unreachable server should fail");
    assert!(stderr.contains("Error"), "should report a request error: {stderr}");
}

#[test]
fn test_put_unreachable_server_reports_error() {
    let (code, _, stderr) = run(&["put", "alice/db-password", "hunter2"]);
    assert_ne!(code, 0, "put against an unreachable server should fail");
    assert!(stderr.contains("Error"), "should report a request error: {stderr}");
}

#[test]
fn test_mkdir_unreachable_server_reports_error() {
    let (code, _, stderr) = run(&["mkdir", "alice"]);
    assert_ne!(code, 0, "mkdir against an unreachable server should fail");
    assert!(stderr.contains("Error"), "should report a request error: {stderr}");
}

#[test]
fn test_ls_unreachable_server_reports_error() {
    let (code, _, stderr) = run(&["ls", "alice"]);
    assert_ne!(code, 0, "ls against an unreachable server should fail");
    assert!(stderr.contains("Error"), "should report a request error: {stderr}");
}
