//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

/// Get the path to the built binary
fn sharesync_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sharesync"))
}

/// Run sharesync against an engine directory and return (stdout, stderr, success)
fn run(args: &[&str], dir: &Path) -> (String, String, bool) {
    let output = Command::new(sharesync_binary())
        .arg("-d")
        .arg(dir)
        .args(["-f", "json"])
        .args(args)
        .output()
        .expect("Failed to execute sharesync");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout.trim()).expect("stdout should be JSON")
}

fn write(dir: &Path, name: &str, data: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path.to_str().unwrap().to_string()
}

// ============================================================================
// Engine Initialization Tests
// ============================================================================

#[test]
fn test_cli_init_creates_store() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");

    let (stdout, _stderr, success) = run(&["init"], &engine);

    assert!(success, "init should succeed");
    assert_eq!(json(&stdout)["status"], "ok");
    assert!(engine.join("blocks.store").exists(), "store file should exist");
}

#[test]
fn test_cli_default_dir_is_dot_sharesync() {
    let output = Command::new(sharesync_binary())
        .args(["--help"])
        .output()
        .expect("Failed to execute sharesync");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("[default: .sharesync]"),
        "Default engine dir should be .sharesync, got: {}",
        stdout
    );
}

// ============================================================================
// Item Tests
// ============================================================================

#[test]
fn test_cli_put_info_get() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");
    let file = write(dir.path(), "input.txt", b"hello sync");

    let (stdout, _stderr, success) = run(&["put", &file, "docs/hello.txt"], &engine);
    assert!(success, "put should succeed");
    let put = json(&stdout);
    assert_eq!(put["item"]["path"], "/docs/hello.txt");
    assert_eq!(put["item"]["size"], 10);

    let (stdout, _stderr, success) = run(&["info", "/docs/hello.txt"], &engine);
    assert!(success, "info should succeed");
    assert_eq!(json(&stdout)["kind"], "file");

    let dest = dir.path().join("out.txt");
    let (_stdout, _stderr, success) =
        run(&["get", "/docs/hello.txt", dest.to_str().unwrap()], &engine);
    assert!(success, "get should succeed");
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello sync");
}

#[test]
fn test_cli_missing_path_fails() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");
    run(&["init"], &engine);

    let (stdout, _stderr, success) = run(&["info", "/nope"], &engine);
    assert!(!success, "info on a missing path should fail");
    assert_eq!(json(&stdout)["status"], "error");

    let (_stdout, _stderr, success) = run(&["rm", "/nope"], &engine);
    assert!(!success, "rm on a missing path should fail");
}

#[test]
fn test_cli_ls_and_rm() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");
    let a = write(dir.path(), "a", b"a");
    let b = write(dir.path(), "b", b"b");

    run(&["put", &a, "/a.txt"], &engine);
    run(&["put", &b, "/b.txt"], &engine);

    let (stdout, _stderr, success) = run(&["ls"], &engine);
    assert!(success);
    let listing = json(&stdout);
    assert_eq!(listing["count"], 2);
    assert_eq!(listing["items"][0]["path"], "/a.txt");

    let (_stdout, _stderr, success) = run(&["rm", "/a.txt"], &engine);
    assert!(success, "rm should succeed");

    let (stdout, _stderr, _) = run(&["ls"], &engine);
    assert_eq!(json(&stdout)["count"], 1);
}

// ============================================================================
// Merge and Status Tests
// ============================================================================

#[test]
fn test_cli_merge_two_engines() {
    let dir = tempdir().unwrap();
    let left = dir.path().join("left");
    let right = dir.path().join("right");
    let a = write(dir.path(), "a", b"left side");
    let b = write(dir.path(), "b", b"right side");

    run(&["put", &a, "/left.txt"], &left);
    run(&["put", &b, "/right.txt"], &right);

    let (stdout, stderr, success) = run(&["merge", right.to_str().unwrap()], &left);
    assert!(success, "merge should succeed: {}", stderr);
    assert_eq!(json(&stdout)["items"], 2);

    let dest = dir.path().join("copied.txt");
    let (_stdout, _stderr, success) =
        run(&["get", "/right.txt", dest.to_str().unwrap()], &left);
    assert!(success, "merged item should be readable");
    assert_eq!(std::fs::read(&dest).unwrap(), b"right side");
}

#[test]
fn test_cli_merge_rejects_missing_engine() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");
    run(&["init"], &engine);

    let missing = dir.path().join("missing");
    let (_stdout, _stderr, success) = run(&["merge", missing.to_str().unwrap()], &engine);
    assert!(!success, "merging a missing engine should fail");
    assert!(!missing.exists());
}

#[test]
fn test_cli_status_and_checkpoint() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");
    let file = write(dir.path(), "f", b"content");

    run(&["init"], &engine);
    let (stdout, _stderr, success) = run(&["status"], &engine);
    assert!(success);
    let status = json(&stdout);
    assert_eq!(status["items"], 0);
    assert_eq!(status["root"], "");

    run(&["put", &file, "/f"], &engine);
    let (stdout, _stderr, _) = run(&["status"], &engine);
    let status = json(&stdout);
    assert_eq!(status["items"], 1);
    assert_ne!(status["root"], "");

    let (stdout, _stderr, success) = run(&["checkpoint"], &engine);
    assert!(success);
    assert!(!json(&stdout)["adds"].as_array().unwrap().is_empty());
}

#[test]
fn test_cli_text_format_is_pretty_json() {
    let dir = tempdir().unwrap();
    let engine = dir.path().join("engine");

    let output = Command::new(sharesync_binary())
        .arg("-d")
        .arg(&engine)
        .args(["-f", "text", "status"])
        .output()
        .expect("Failed to execute sharesync");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains('\n'));
    assert_eq!(json(&stdout)["items"], 0);
}
