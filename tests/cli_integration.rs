//! CLI Integration Tests
//!
//! These tests drive the built `mpt` binary end-to-end against a database
//! file in a temporary directory.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use serde_json::Value;
use std::process::Command;
use tempfile::tempdir;

/// Run mpt and return (parsed stdout, stderr, success)
fn run_mpt(args: &[&str], db_path: &str) -> (Value, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_mpt"))
        .args(["-d", db_path, "-f", "json"])
        .args(args)
        .output()
        .expect("Failed to execute mpt");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = serde_json::from_str(stdout.trim()).unwrap_or(Value::Null);
    (
        value,
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// Run a mutating command against `root` and return the new root
fn mutate(args: &[&str], root: &str, db_path: &str) -> String {
    let mut full = vec!["--root", root];
    full.extend_from_slice(args);
    let (out, stderr, success) = run_mpt(&full, db_path);
    assert!(success, "{:?} failed: {}", args, stderr);
    out["root"].as_str().unwrap().to_string()
}

fn keys(out: &Value) -> Vec<String> {
    out["pairs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["key"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Database Initialization Tests
// ============================================================================

#[test]
fn test_cli_init_creates_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let (out, _stderr, success) = run_mpt(&["init"], db_str);

    assert!(success, "init should succeed");
    assert_eq!(out["status"], "ok");
    assert_eq!(out["root"].as_str().unwrap(), "0".repeat(64));
    assert!(db_path.exists(), "database file should be created");
}

#[test]
fn test_cli_default_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_mpt"))
        .args(["--help"])
        .output()
        .expect("Failed to execute mpt");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("[default: trie.mpt]"),
        "Default database path should be trie.mpt, got: {}",
        stdout
    );
}

// ============================================================================
// Mutation Tests
// ============================================================================

#[test]
fn test_cli_put_get_roundtrip() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    run_mpt(&["init"], db_str);
    let root = mutate(&["put", "hello", "world"], "", db_str);
    assert_ne!(root, "0".repeat(64));

    let (out, _stderr, success) = run_mpt(&["--root", &root, "get", "hello"], db_str);
    assert!(success, "get should succeed");
    assert_eq!(out["value"], "world");
}

#[test]
fn test_cli_get_missing_key_fails() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let root = mutate(&["put", "a", "1"], "", db_str);
    let (out, _stderr, success) = run_mpt(&["--root", &root, "get", "b"], db_str);

    assert!(!success, "get of a missing key should fail");
    assert_eq!(out["status"], "error");
}

#[test]
fn test_cli_root_is_order_independent() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.mpt");
    let second = dir.path().join("second.mpt");

    let mut root_a = String::new();
    for (k, v) in [("x", "1"), ("y", "2"), ("xy", "3")] {
        root_a = mutate(&["put", k, v], &root_a, first.to_str().unwrap());
    }
    let mut root_b = String::new();
    for (k, v) in [("xy", "3"), ("y", "2"), ("x", "1")] {
        root_b = mutate(&["put", k, v], &root_b, second.to_str().unwrap());
    }
    assert_eq!(root_a, root_b);
}

#[test]
fn test_cli_delete_restores_previous_root() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let one = mutate(&["put", "a", "1"], "", db_str);
    let two = mutate(&["put", "ab", "2"], &one, db_str);
    let (out, _stderr, success) = run_mpt(&["--root", &two, "delete", "ab"], db_str);

    assert!(success);
    assert_eq!(out["changed"], true);
    assert_eq!(out["root"].as_str().unwrap(), one);

    let (out, _stderr, _) = run_mpt(&["--root", &one, "delete", "zz"], db_str);
    assert_eq!(out["changed"], false);
}

#[test]
fn test_cli_no_commit_leaves_store_unchanged() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    run_mpt(&["init"], db_str);
    let (out, _stderr, success) = run_mpt(&["--no-commit", "put", "k", "v"], db_str);
    assert!(success);
    assert_eq!(out["committed"], false);

    let root = out["root"].as_str().unwrap().to_string();
    let (_out, stderr, success) = run_mpt(&["--root", &root, "get", "k"], db_str);
    assert!(!success, "uncommitted root should not resolve");
    assert!(stderr.contains("Missing node"), "stderr was: {}", stderr);
}

// ============================================================================
// Traversal Tests
// ============================================================================

#[test]
fn test_cli_find_and_seek() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let mut root = String::new();
    for (k, v) in [("a", "1"), ("ab", "2"), ("ac", "3"), ("b", "4")] {
        root = mutate(&["put", k, v], &root, db_str);
    }

    let (out, _stderr, success) = run_mpt(&["--root", &root, "find", "a"], db_str);
    assert!(success);
    assert_eq!(out["count"], 3);
    assert_eq!(keys(&out), vec!["a", "ab", "ac"]);

    let (out, _stderr, _) = run_mpt(&["--root", &root, "find"], db_str);
    assert_eq!(out["count"], 4);

    let (out, _stderr, _) = run_mpt(&["--root", &root, "seek", "ab", "--limit", "2"], db_str);
    assert_eq!(keys(&out), vec!["ab", "ac"]);

    let (out, _stderr, _) = run_mpt(&["--root", &root, "seek", "ab", "--backward"], db_str);
    assert_eq!(keys(&out), vec!["ab", "a"]);
}

#[test]
fn test_cli_hex_keys() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let root = mutate(&["--hex", "put", "00ff", "beef"], "", db_str);
    let (out, _stderr, success) = run_mpt(&["--hex", "--root", &root, "find", "00"], db_str);

    assert!(success);
    assert_eq!(keys(&out), vec!["00ff"]);
    assert_eq!(out["pairs"][0]["value"], "beef");
}

// ============================================================================
// Proof and Inspection Tests
// ============================================================================

#[test]
fn test_cli_proof() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let mut root = String::new();
    for (k, v) in [("dog", "puppy"), ("doge", "coin")] {
        root = mutate(&["put", k, v], &root, db_str);
    }

    let (out, _stderr, success) = run_mpt(&["--root", &root, "proof", "doge"], db_str);
    assert!(success);
    assert_eq!(out["value"], "coin");
    assert!(!out["nodes"].as_array().unwrap().is_empty());
}

#[test]
fn test_cli_root_and_dump() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let root = mutate(&["put", "k", "v"], "", db_str);

    let (out, _stderr, success) = run_mpt(&["--root", &root, "root"], db_str);
    assert!(success);
    assert_eq!(out["root"].as_str().unwrap(), root);
    assert_eq!(out["empty"], false);

    let (out, _stderr, success) = run_mpt(&["--root", &root, "dump"], db_str);
    assert!(success);
    assert_eq!(out["node"]["type"], "extension");
}

#[test]
fn test_cli_rejects_bad_root() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("trie.mpt");
    let db_str = db_path.to_str().unwrap();

    let (_out, stderr, success) = run_mpt(&["--root", "not-hex", "get", "k"], db_str);
    assert!(!success);
    assert!(stderr.contains("Invalid hash"), "stderr was: {}", stderr);
}
