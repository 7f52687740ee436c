//! CLI integration tests using `assert_cmd`.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MIGRATE_VARS: &[&str] = &[
    "MIGRATE_CONFIG",
    "MIGRATE_LOG_LEVEL",
    "MIGRATE_SOURCE_TYPE",
    "MIGRATE_SOURCE_URL",
    "MIGRATE_SOURCE_API_KEY",
    "MIGRATE_SOURCE_DATABASE",
    "MIGRATE_SOURCE_PATH",
    "MIGRATE_TARGET_HOST",
    "MIGRATE_TARGET_PORT",
    "MIGRATE_TARGET_USER",
    "MIGRATE_TARGET_PASSWORD",
    "MIGRATE_TARGET_DATABASE",
    "MIGRATE_TARGET_SCHEMA",
    "MIGRATE_BATCH_SIZE",
];

/// Get the CLI binary command with a clean environment.
#[allow(deprecated)]
fn migrate_cmd() -> Command {
    let mut cmd = Command::cargo_bin("supportdesk-migrate").unwrap();
    for var in MIGRATE_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// Dump directory plus a config migrating it into memory.
fn fixture(users: serde_json::Value, tickets: serde_json::Value, target: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let dump = dir.path().join("dump");
    fs::create_dir_all(&dump).unwrap();
    fs::write(dump.join("users.json"), users.to_string()).unwrap();
    fs::write(dump.join("tickets.json"), tickets.to_string()).unwrap();

    let config = format!(
        "source:\n  type: json_dump\n  path: {:?}\n{}\noptions:\n  batch_size: 10\n  batch_delay_ms: 0\n  show_progress: false\n",
        dump.display().to_string(),
        target
    );
    fs::write(dir.path().join("migration.yaml"), config).unwrap();
    dir
}

const MEMORY_TARGET: &str = "target:\n  type: memory";

const POSTGRES_TARGET: &str =
    "target:\n  type: postgres\n  host: localhost\n  user: migrator\n  database: helpdesk";

fn users() -> serde_json::Value {
    json!([
        {"_id": "a1", "email": "a1@example.com", "createdAt": "2024-01-01T00:00:00Z"},
        {"_id": "a2", "email": "a2@example.com", "createdAt": "2024-01-02T00:00:00Z"}
    ])
}

fn ticket(id: &str, account: &str) -> serde_json::Value {
    json!({"_id": id, "accountId": account, "subject": "help", "createdAt": "2024-02-01T00:00:00Z"})
}

fn config_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("migration.yaml")
}

// =============================================================================
// Help & Version Tests
// =============================================================================

#[test]
fn test_help_displays_usage() {
    migrate_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn test_version_displays_version() {
    migrate_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("supportdesk-migrate"));
}

#[test]
fn test_invalid_command_shows_error() {
    migrate_cmd()
        .arg("invalid_command_xyz")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

// =============================================================================
// Schema & Init Tests
// =============================================================================

#[test]
fn test_schema_prints_parents_first() {
    let output = migrate_cmd().arg("schema").output().unwrap();
    assert!(output.status.success());

    let ddl = String::from_utf8(output.stdout).unwrap();
    let accounts = ddl.find("CREATE TABLE IF NOT EXISTS \"accounts\"").unwrap();
    let tickets = ddl.find("CREATE TABLE IF NOT EXISTS \"tickets\"").unwrap();
    let comments = ddl.find("CREATE TABLE IF NOT EXISTS \"comments\"").unwrap();
    assert!(accounts < tickets);
    assert!(tickets < comments);
}

#[test]
fn test_init_writes_config_once() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("migration.yaml");

    migrate_cmd()
        .arg("init")
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated configuration"));
    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("type: mongodb"));

    migrate_cmd()
        .arg("init")
        .arg("--output")
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    migrate_cmd()
        .args(["init", "--force", "--output"])
        .arg(&output)
        .assert()
        .success();
}

// =============================================================================
// Run Tests
// =============================================================================

#[test]
fn test_run_clean_migration_exits_zero() {
    let dir = fixture(users(), json!([ticket("t1", "a1")]), MEMORY_TARGET);
    let report = dir.path().join("report.json");

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .args(["run", "--verify", "--report-json"])
        .arg(&report)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("PASS"))
        .stdout(predicate::str::contains("Verification passed"));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["migration"]["entities"][0]["name"], "accounts");
    assert_eq!(json["migration"]["entities"][0]["migrated"], 2);
    assert_eq!(json["verification"]["summary"]["total"], 0);
}

#[test]
fn test_dry_run_ignores_configured_server() {
    let dir = fixture(users(), json!([]), POSTGRES_TARGET);

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .args(["run", "--dry-run"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("accounts"));
}

#[test]
fn test_row_errors_exit_three() {
    let bad = json!({"_id": "t2", "accountId": "a1", "subject": "help", "createdAt": "not a date"});
    let dir = fixture(users(), json!([ticket("t1", "a1"), bad]), MEMORY_TARGET);

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .arg("run")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("FAIL"));
}

#[test]
fn test_verification_findings_exit_two() {
    let dir = fixture(
        users(),
        json!([ticket("t1", "a1"), ticket("t2", "ghost")]),
        MEMORY_TARGET,
    );

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .args(["run", "--verify"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("orphaned_reference"));
}

#[test]
fn test_invalid_options_are_fatal() {
    let dir = fixture(users(), json!([]), MEMORY_TARGET);

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .args(["run", "--batch-size", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_missing_config_file_is_fatal() {
    migrate_cmd()
        .arg("--config")
        .arg(Path::new("/nonexistent/migration.yaml"))
        .arg("check")
        .assert()
        .code(1);
}

// =============================================================================
// Check & Verify Tests
// =============================================================================

#[test]
fn test_check_reports_ready() {
    let dir = fixture(users(), json!([]), MEMORY_TARGET);

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("users"))
        .stdout(predicate::str::contains("ready"));
}

#[test]
fn test_verify_reconciles_counts() {
    let dir = fixture(users(), json!([]), MEMORY_TARGET);

    // A fresh in-memory target holds nothing, so counts disagree.
    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .arg("verify")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("count_mismatch"));

    migrate_cmd()
        .arg("--config")
        .arg(config_path(&dir))
        .args(["verify", "--skip-counts"])
        .assert()
        .code(0);
}
