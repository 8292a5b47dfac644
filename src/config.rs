//! Configuration for teamboard, read from `teamboard.toml`.
//!
//! Layering is file → environment → CLI: every table has defaults, secrets
//! fall back to environment variables, and the binary overrides host, port
//! and database path from its flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [database]
//! path = ".teamboard/dashboard.db"
//!
//! [logging]
//! dir = ".teamboard/logs"
//! json = false
//!
//! [feature]
//! in_progress_statuses = ["in progress", "waiting", "impeded"]
//! done_statuses = ["done", "accepted"]
//!
//! [jira]
//! enabled = true
//! base_url = "https://jira.example.com"
//! username = "svc-dashboard"
//! projects = ["PROJ"]
//! poll_interval_secs = 300
//!
//! [gitlab]
//! enabled = true
//! first_run_history_days = 14
//! not_built_commits = ["[ci skip]"]
//!
//! [jenkins]
//! enabled = true
//! servers = ["https://ci.example.com/"]
//! behave_json_regex = "behave.*\\.json$"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::feature::StatusBuckets;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "teamboard.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served front-end.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".teamboard/dashboard.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write logs to a daily-rolling file in this directory instead of stderr.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// Status vocabularies used by the estimate aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_in_progress_statuses")]
    pub in_progress_statuses: Vec<String>,
    #[serde(default = "default_done_statuses")]
    pub done_statuses: Vec<String>,
}

fn default_in_progress_statuses() -> Vec<String> {
    vec!["in progress".into(), "waiting".into(), "impeded".into()]
}

fn default_done_statuses() -> Vec<String> {
    vec!["done".into(), "accepted".into()]
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            in_progress_statuses: default_in_progress_statuses(),
            done_statuses: default_done_statuses(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    /// API token; falls back to `JIRA_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    /// Project keys to collect stories from.
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub todo_statuses: Vec<String>,
    #[serde(default)]
    pub doing_statuses: Vec<String>,
    #[serde(default)]
    pub done_statuses: Vec<String>,
    /// Oldest change date considered when looking up the last synced story.
    #[serde(default = "default_delta_start_date")]
    pub delta_start_date: String,
}

fn default_page_size() -> usize {
    100
}

fn default_delta_start_date() -> String {
    "2000-01-01T00:00:00.000".to_string()
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            base_url: String::new(),
            username: None,
            token: None,
            projects: Vec::new(),
            page_size: default_page_size(),
            todo_statuses: Vec::new(),
            doing_statuses: Vec::new(),
            done_statuses: Vec::new(),
            delta_start_date: default_delta_start_date(),
        }
    }
}

impl JiraConfig {
    pub fn token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("JIRA_TOKEN").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Private token; falls back to `GITLAB_TOKEN`.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// How far back the first collection of a repo reaches. Values of zero
    /// or below use the built-in default of 14 days.
    #[serde(default = "default_first_run_history_days")]
    pub first_run_history_days: i64,
    /// Commit message markers for commits that never trigger a build.
    #[serde(default)]
    pub not_built_commits: Vec<String>,
}

fn default_first_run_history_days() -> i64 {
    14
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            auth_token: None,
            first_run_history_days: default_first_run_history_days(),
            not_built_commits: Vec::new(),
        }
    }
}

impl GitLabConfig {
    pub fn auth_token(&self) -> String {
        self.auth_token
            .clone()
            .or_else(|| std::env::var("GITLAB_TOKEN").ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// API token; falls back to `JENKINS_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
    /// Artifact path pattern identifying behave JSON reports.
    #[serde(default = "default_behave_json_regex")]
    pub behave_json_regex: String,
}

fn default_behave_json_regex() -> String {
    r"behave.*\.json$".to_string()
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_secs: default_poll_interval_secs(),
            servers: Vec::new(),
            username: None,
            token: None,
            behave_json_regex: default_behave_json_regex(),
        }
    }
}

impl JenkinsConfig {
    pub fn token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("JENKINS_TOKEN").ok())
    }
}

/// Root of `teamboard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamboardToml {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub feature: FeatureConfig,
    #[serde(default)]
    pub jira: JiraConfig,
    #[serde(default)]
    pub gitlab: GitLabConfig,
    #[serde(default)]
    pub jenkins: JenkinsConfig,
}

impl TeamboardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Load from `path` when it exists, otherwise return the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Status buckets for the estimate aggregation.
    pub fn status_buckets(&self) -> Result<StatusBuckets, ConfigError> {
        StatusBuckets::new(
            &self.feature.in_progress_statuses,
            &self.feature.done_statuses,
        )
    }

    /// Non-fatal problems worth reporting before starting.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.status_buckets() {
            warnings.push(e.to_string());
        }

        let intervals = [
            ("jira", self.jira.enabled, self.jira.poll_interval_secs),
            ("gitlab", self.gitlab.enabled, self.gitlab.poll_interval_secs),
            ("jenkins", self.jenkins.enabled, self.jenkins.poll_interval_secs),
        ];
        for (name, enabled, secs) in intervals {
            if enabled && secs == 0 {
                warnings.push(format!("[{}] poll_interval_secs must be greater than 0", name));
            }
        }

        if self.jira.enabled && !self.jira.projects.is_empty() && self.jira.base_url.is_empty() {
            warnings.push("[jira] projects are configured but base_url is empty".to_string());
        }
        if self.jira.page_size == 0 {
            warnings.push("[jira] page_size must be greater than 0".to_string());
        }

        if let Err(e) = regex::Regex::new(&self.jenkins.behave_json_regex) {
            warnings.push(format!(
                "[jenkins] invalid behave_json_regex '{}': {}",
                self.jenkins.behave_json_regex, e
            ));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_apply_to_empty_file() {
        let config = TeamboardToml::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.path, PathBuf::from(".teamboard/dashboard.db"));
        assert_eq!(config.gitlab.first_run_history_days, 14);
        assert_eq!(config.jira.page_size, 100);
        assert_eq!(
            config.feature.in_progress_statuses,
            vec!["in progress", "waiting", "impeded"]
        );
        assert_eq!(config.feature.done_statuses, vec!["done", "accepted"]);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_tables() {
        let config = TeamboardToml::parse(
            r#"
            [server]
            port = 9000

            [jenkins]
            servers = ["https://ci.example.com/"]
            poll_interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.jenkins.servers, vec!["https://ci.example.com/"]);
        assert_eq!(config.jenkins.poll_interval_secs, 60);
        assert_eq!(config.jira.poll_interval_secs, 300);
    }

    #[test]
    fn test_parse_rejects_invalid_toml() {
        let err = TeamboardToml::parse("[server\nport = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = TeamboardToml::default();
        config.gitlab.not_built_commits = vec!["[ci skip]".into()];
        config.save(&path).unwrap();

        let loaded = TeamboardToml::load(&path).unwrap();
        assert_eq!(loaded.gitlab.not_built_commits, vec!["[ci skip]"]);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = TeamboardToml::load_or_default(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = TeamboardToml::load(Path::new("/nonexistent/teamboard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_flags_overlapping_buckets() {
        let config = TeamboardToml::parse(
            r#"
            [feature]
            in_progress_statuses = ["in progress", "Done"]
            done_statuses = ["done"]
            "#,
        )
        .unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("done"));
    }

    #[test]
    fn test_validate_flags_zero_interval_and_bad_regex() {
        let config = TeamboardToml::parse(
            r#"
            [gitlab]
            poll_interval_secs = 0

            [jenkins]
            behave_json_regex = "("
            "#,
        )
        .unwrap();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("[gitlab]")));
        assert!(warnings.iter().any(|w| w.contains("behave_json_regex")));
    }

    #[test]
    fn test_disabled_source_with_zero_interval_is_fine() {
        let config = TeamboardToml::parse(
            r#"
            [jira]
            enabled = false
            poll_interval_secs = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_empty());
    }
}
