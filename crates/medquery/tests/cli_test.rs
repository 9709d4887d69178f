//! Integration tests for the `medquery` CLI binary.
//!
//! These tests validate argument parsing, key output, the demo scenario,
//! and config file handling against temporary directories only.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `medquery` binary with env isolation.
///
/// Clears all `MEDQUERY_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn medquery_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("medquery");
    cmd.env("HOME", "/tmp/medquery-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/medquery-cli-test-nonexistent")
        .env_remove("MEDQUERY_CONFIG")
        .env_remove("MEDQUERY_OUTPUT")
        .env_remove("MEDQUERY_DEFAULTS__PAGE_SIZE")
        .env_remove("MEDQUERY_DEMO__LATENCY_MS")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn demo_json(args: &[&str]) -> serde_json::Value {
    let output = medquery_cmd()
        .args(["demo", "--latency-ms", "0", "-o", "json"])
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    serde_json::from_slice(&output.stdout).unwrap()
}

fn fetches(report: &serde_json::Value, screen: &str) -> u64 {
    report["subscriptions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["screen"] == screen)
        .and_then(|s| s["fetches"].as_u64())
        .unwrap()
}

fn config_arg(path: &Path) -> String {
    path.display().to_string()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = medquery_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    medquery_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("demo")
            .and(predicate::str::contains("keys"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    medquery_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("medquery"));
}

#[test]
fn test_completions_bash() {
    medquery_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Keys ────────────────────────────────────────────────────────────

#[test]
fn test_keys_plain_lists_family() {
    medquery_cmd()
        .args(["keys", "allergies", "--id", "a1", "-o", "plain"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#"["allergies"]"#)
                .and(predicate::str::contains(r#"["allergies","detail","a1"]"#))
                .and(predicate::str::contains(r#""pageSize":20"#)),
        );
}

#[test]
fn test_keys_vital_signs_root() {
    medquery_cmd()
        .args(["keys", "vital-signs", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vitalSigns"))
        .stdout(predicate::str::contains("/api/patient/vitality/vital-signs"));
}

#[test]
fn test_keys_unknown_resource() {
    let output = medquery_cmd().args(["keys", "vitals"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_keys_bad_filter_is_usage_error() {
    let output = medquery_cmd()
        .args(["keys", "conditions", "--filter", "severity"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("FIELD=VALUE"));
}

// ── Demo ────────────────────────────────────────────────────────────

#[test]
fn test_demo_refetch_counts() {
    let report = demo_json(&["--writes", "3"]);

    // Mount + one refetch per write; the detail screen refreshes once per
    // write even though updates match it twice.
    assert_eq!(fetches(&report, "list"), 4);
    assert_eq!(fetches(&report, "detail"), 4);
    assert_eq!(report["steps"].as_array().unwrap().len(), 4);
    assert_eq!(report["registered_keys"], 2);
}

#[test]
fn test_demo_search_moves_list_key() {
    let report = demo_json(&["--writes", "0", "--search", "pen"]);
    assert_eq!(fetches(&report, "list"), 2);
    let key = report["subscriptions"][0]["key"].as_str().unwrap();
    assert!(key.contains(r#""search":"pen""#), "{key}");
}

#[test]
fn test_demo_survives_backend_failures() {
    let report = demo_json(&["--writes", "6", "--fail-every", "3", "--resource", "conditions"]);
    assert_eq!(report["resource"], "conditions");
    assert_eq!(report["steps"].as_array().unwrap().len(), 7);
}

#[test]
fn test_demo_table_output() {
    medquery_cmd()
        .args(["demo", "--latency-ms", "0", "--writes", "1"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Allergies")
                .and(predicate::str::contains("List fetches"))
                .and(predicate::str::contains("backend requests")),
        );
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("medquery.toml");
    medquery_cmd()
        .args(["config", "path", "--config", &config_arg(&path)])
        .assert()
        .success()
        .stdout(predicate::str::contains("medquery.toml"));
}

#[test]
fn test_config_init_and_force() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let arg = config_arg(&path);

    medquery_cmd()
        .args(["config", "init", "--config", &arg])
        .assert()
        .success();
    assert!(path.exists());

    let output = medquery_cmd()
        .args(["config", "init", "--config", &arg])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--force"));

    medquery_cmd()
        .args(["config", "init", "--force", "--config", &arg])
        .assert()
        .success();

    medquery_cmd()
        .args(["config", "show", "-o", "json", "--config", &arg])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"page_size\": 20"));
}

#[test]
fn test_invalid_page_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[defaults]\npage_size = 0\n").unwrap();

    let output = medquery_cmd()
        .args(["demo", "--latency-ms", "0", "--config", &config_arg(&path)])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("page_size"));
}

#[test]
fn test_env_overrides_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[defaults]\npage_size = 30\n").unwrap();

    medquery_cmd()
        .env("MEDQUERY_DEFAULTS__PAGE_SIZE", "5")
        .args(["keys", "sleep", "-o", "plain", "--config", &config_arg(&path)])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""pageSize":5"#));
}
