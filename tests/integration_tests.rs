//! Integration tests for the testboard CLI.
//!
//! Every test runs in its own temp directory with the database path pinned
//! there, so nothing touches the working tree or the network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a testboard Command rooted in `dir`
fn testboard(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("testboard");
    cmd.current_dir(dir.path())
        .env("TESTBOARD_DB_PATH", dir.path().join("data/testboard.db"))
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = temp_dir();
        testboard(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("coordinate"));
    }

    #[test]
    fn test_version() {
        let dir = temp_dir();
        testboard(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_db_creates_database() {
        let dir = temp_dir();
        testboard(&dir)
            .arg("init-db")
            .assert()
            .success()
            .stdout(predicate::str::contains("Report database initialized"));

        assert!(dir.path().join("data/testboard.db").exists());
    }

    #[test]
    fn test_init_db_idempotent() {
        let dir = temp_dir();
        testboard(&dir).arg("init-db").assert().success();
        testboard(&dir).arg("init-db").assert().success();
    }

    #[test]
    fn test_invalid_env_value_fails() {
        let dir = temp_dir();
        testboard(&dir)
            .env("TESTBOARD_PORT", "http")
            .arg("init-db")
            .assert()
            .failure()
            .stderr(predicate::str::contains("TESTBOARD_PORT"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 8080"))
            .stdout(predicate::str::contains("GITHUB_TOKEN: not set"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));

        let content = fs::read_to_string(dir.path().join("testboard.toml")).unwrap();
        assert!(content.contains("[reports]"));
        assert!(content.contains("poll_interval_ms = 5000"));
    }

    #[test]
    fn test_config_init_refuses_to_overwrite() {
        let dir = temp_dir();
        fs::write(dir.path().join("testboard.toml"), "[server]\nport = 9000\n").unwrap();
        testboard(&dir)
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_show_reads_file() {
        let dir = temp_dir();
        fs::write(dir.path().join("testboard.toml"), "[server]\nport = 9000\n").unwrap();
        testboard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("custom.toml"),
            "[reports]\npoll_interval_ms = 0\n",
        )
        .unwrap();
        testboard(&dir)
            .args(["--config", "custom.toml", "config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("poll_interval_ms"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = temp_dir();
        fs::write(dir.path().join("testboard.toml"), "[server\nport = ").unwrap();
        testboard(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse"));
    }
}

// =============================================================================
// Reports
// =============================================================================

mod reports {
    use super::*;

    #[test]
    fn test_report_rejects_bad_date_before_any_request() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["report", "--date", "2025-13-01", "--url", "http://127.0.0.1:1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid report request"));
    }

    #[test]
    fn test_report_rejects_bad_enrichments() {
        let dir = temp_dir();
        testboard(&dir)
            .args([
                "report",
                "--date",
                "2025-10-09",
                "--enrichments",
                "details",
                "--url",
                "http://127.0.0.1:1",
            ])
            .assert()
            .failure();
    }

    #[test]
    fn test_report_unreachable_server_fails() {
        let dir = temp_dir();
        fs::write(
            dir.path().join("testboard.toml"),
            "[retry]\nmax_attempts = 1\n",
        )
        .unwrap();
        testboard(&dir)
            .args(["report", "--date", "2025-10-09", "--url", "http://127.0.0.1:1"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Pull requests
// =============================================================================

mod pull_requests {
    use super::*;

    #[test]
    fn test_track_pr_with_title() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["track-pr", "acme/web", "42", "--title", "Fix flaky login test"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Tracking acme/web#42"));
    }

    #[test]
    fn test_track_pr_accepts_github_url() {
        let dir = temp_dir();
        testboard(&dir)
            .args([
                "track-pr",
                "https://github.com/acme/web",
                "7",
                "--title",
                "Bump deps",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("acme/web#7"));
    }

    #[test]
    fn test_track_pr_rejects_bad_repository() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["track-pr", "not a repo", "1", "--title", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid repository"));
    }

    #[test]
    fn test_track_pr_rejects_non_positive_number() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["track-pr", "acme/web", "0", "--title", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid pull request number"));
    }

    #[test]
    fn test_coordinate_dry_run_with_nothing_tracked() {
        let dir = temp_dir();
        testboard(&dir)
            .args(["coordinate", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"fetched\": 0"));
    }
}
