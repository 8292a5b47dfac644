//! Integration tests for the teamboard binary.
//!
//! Every test runs in its own temp directory with a config that keeps the
//! collectors away from the network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a teamboard Command
fn teamboard() -> Command {
    cargo_bin_cmd!("teamboard")
}

/// Config with only the Jenkins collector enabled and no servers to poll.
const OFFLINE_CONFIG: &str = r#"
[database]
path = "data/dashboard.db"

[jira]
enabled = false

[gitlab]
enabled = false

[jenkins]
enabled = true
servers = []
"#;

fn offline_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("teamboard.toml"), OFFLINE_CONFIG).unwrap();
    dir
}

fn run_in(dir: &Path, args: &[&str]) -> String {
    let output = teamboard()
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("TEAMBOARD_DB")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(output).unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_teamboard_help() {
        teamboard()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("collect"));
    }

    #[test]
    fn test_teamboard_version() {
        teamboard().arg("--version").assert().success();
    }

    #[test]
    fn test_missing_subcommand_fails() {
        teamboard().assert().failure();
    }
}

// =============================================================================
// Database
// =============================================================================

mod database {
    use super::*;

    #[test]
    fn test_init_db_creates_file_and_parent_dirs() {
        let dir = offline_project();
        let stdout = run_in(dir.path(), &["init-db"]);
        assert!(stdout.contains("Database ready"));
        assert!(dir.path().join("data/dashboard.db").exists());
    }

    #[test]
    fn test_db_path_flag_overrides_config() {
        let dir = offline_project();
        run_in(dir.path(), &["init-db", "--db-path", "elsewhere.db"]);
        assert!(dir.path().join("elsewhere.db").exists());
        assert!(!dir.path().join("data/dashboard.db").exists());
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        let stdout = run_in(dir.path(), &["config", "init"]);
        assert!(stdout.contains("Created teamboard.toml"));
        assert!(dir.path().join("teamboard.toml").exists());

        let stdout = run_in(dir.path(), &["config", "validate"]);
        assert!(stdout.contains("Configuration is valid."));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = offline_project();
        let stdout = run_in(dir.path(), &["config", "init"]);
        assert!(stdout.contains("already exists"));
        let content = fs::read_to_string(dir.path().join("teamboard.toml")).unwrap();
        assert_eq!(content, OFFLINE_CONFIG);
    }

    #[test]
    fn test_config_show_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let stdout = run_in(dir.path(), &["config", "show"]);
        assert!(stdout.contains("No teamboard.toml found"));
        assert!(stdout.contains("port = 8080"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("teamboard.toml"),
            "[feature]\nin_progress_statuses = [\"Done\"]\ndone_statuses = [\"done\"]\n",
        )
        .unwrap();
        let stdout = run_in(dir.path(), &["config", "validate"]);
        assert!(stdout.contains("Configuration warnings:"));
    }

    #[test]
    fn test_invalid_config_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("teamboard.toml"), "[server\nport = ").unwrap();
        teamboard()
            .current_dir(dir.path())
            .arg("init-db")
            .assert()
            .failure();
    }
}

// =============================================================================
// Collection and component wiring
// =============================================================================

mod collection {
    use super::*;

    #[test]
    fn test_collect_registers_enabled_collector() {
        let dir = offline_project();
        let stdout = run_in(dir.path(), &["collect"]);
        assert!(stdout.contains("JenkinsBehaveTest: collected"));
    }

    #[test]
    fn test_collect_unknown_source_fails() {
        let dir = offline_project();
        teamboard()
            .current_dir(dir.path())
            .args(["collect", "--source", "bamboo"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown source"));
    }

    #[test]
    fn test_collect_disabled_source_runs_nothing() {
        let dir = offline_project();
        let stdout = run_in(dir.path(), &["collect", "--source", "jira"]);
        assert!(stdout.contains("No enabled collectors to run."));
    }

    #[test]
    fn test_component_add_link_and_list() {
        let dir = offline_project();
        run_in(dir.path(), &["collect"]);

        let stdout = run_in(dir.path(), &["component", "add", "Team Falcon"]);
        let id = stdout
            .trim()
            .rsplit_once('(')
            .and_then(|(_, rest)| rest.strip_suffix(')'))
            .unwrap()
            .to_string();

        let stdout = run_in(
            dir.path(),
            &[
                "component",
                "link",
                &id,
                "--type",
                "test",
                "--collector",
                "JenkinsBehaveTest",
                "--option",
                "job_name=nightly",
            ],
        );
        assert!(stdout.contains("Linked test item"));

        let stdout = run_in(dir.path(), &["component", "list"]);
        assert!(stdout.contains("Team Falcon"));
        assert!(stdout.contains("nightly"));
    }

    #[test]
    fn test_component_link_requires_registered_collector() {
        let dir = offline_project();
        let stdout = run_in(dir.path(), &["component", "add", "Team Heron"]);
        let id = stdout
            .trim()
            .rsplit_once('(')
            .and_then(|(_, rest)| rest.strip_suffix(')'))
            .unwrap()
            .to_string();

        teamboard()
            .current_dir(dir.path())
            .args(["component", "link", &id, "--type", "scope_owner", "--collector", "Jira"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not registered"));
    }
}
