//! CLI smoke tests: every subcommand should run end to end against a
//! throwaway config/database and exit cleanly.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn temp_config(db_path: &std::path::Path) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let suffix = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!("fleetsync-cli-test-{nanos}-{suffix}.toml"));
    fs::write(&path, format!("[database]\nurl = \"{}\"\n", db_path.display())).expect("write config");
    path
}

#[test]
fn stats_runs_against_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fleetsync.db");
    let config_path = temp_config(&db_path);

    let output = Command::new(env!("CARGO_BIN_EXE_fleetsync"))
        .args(["--config"])
        .arg(&config_path)
        .arg("stats")
        .output()
        .expect("run fleetsync stats");

    let _ = fs::remove_file(&config_path);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Subscriptions"));
}

#[test]
fn node_status_runs_against_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fleetsync.db");
    let config_path = temp_config(&db_path);

    let output = Command::new(env!("CARGO_BIN_EXE_fleetsync"))
        .args(["--config"])
        .arg(&config_path)
        .arg("node")
        .arg("status")
        .output()
        .expect("run fleetsync node status");

    let _ = fs::remove_file(&config_path);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Nodes") || stdout.contains("none configured"));
}

#[test]
fn config_show_prints_effective_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fleetsync.db");
    let config_path = temp_config(&db_path);

    let output = Command::new(env!("CARGO_BIN_EXE_fleetsync"))
        .args(["--config"])
        .arg(&config_path)
        .arg("config")
        .arg("show")
        .output()
        .expect("run fleetsync config show");

    let _ = fs::remove_file(&config_path);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&db_path.display().to_string()));
}

#[test]
fn config_validate_rejects_malformed_toml() {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("fleetsync-bad-config-{nanos}.toml"));
    fs::write(&path, "this = is = not = toml").expect("write bad config");

    let output = Command::new(env!("CARGO_BIN_EXE_fleetsync"))
        .args(["--config"])
        .arg(&path)
        .arg("config")
        .arg("validate")
        .output()
        .expect("run fleetsync config validate");

    let _ = fs::remove_file(&path);
    assert!(!output.status.success());
}

#[test]
fn unknown_subcommand_fails_fast() {
    let output = Command::new(env!("CARGO_BIN_EXE_fleetsync"))
        .arg("not-a-real-command")
        .output()
        .expect("run fleetsync");
    assert!(!output.status.success());
}
