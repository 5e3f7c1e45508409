//! Configuration for testboard.
//!
//! Settings come from `testboard.toml`, then `TESTBOARD_*` environment
//! variables (a `.env` file is loaded first), then CLI flags.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! db_path = ".testboard/testboard.db"
//! dev_mode = false
//!
//! [reports]
//! dedupe_dispatch = true
//! claim_ttl_secs = 600
//! poll_interval_ms = 5000
//!
//! [coordinator]
//! enabled = true
//! interval_secs = 3600
//! stale_after_days = 14
//! max_concurrent_fetches = 4
//!
//! [github]
//! api_base = "https://api.github.com"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//! max_delay_ms = 30000
//!
//! [logging]
//! level = "info"
//! json = false
//! log_dir = "logs"
//! ```
//!
//! The GitHub token is only read from `GITHUB_TOKEN`, never from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dashboard::coordinator::CoordinatorSettings;
use crate::dashboard::github::DEFAULT_API_BASE;
use crate::dashboard::poller::PollerSettings;
use crate::dashboard::query::QuerySettings;
use crate::dashboard::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "testboard.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Permissive CORS for a separately served front-end.
    pub dev_mode: bool,
    /// Buffered messages per topic before slow subscribers start lagging.
    pub channel_capacity: usize,
    /// Run the report generator inside the server process.
    pub embedded_generator: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: PathBuf::from(".testboard/testboard.db"),
            dev_mode: false,
            channel_capacity: 256,
            embedded_generator: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportsSection {
    /// Collapse concurrent requests for the same absent date into one dispatch.
    pub dedupe_dispatch: bool,
    pub claim_ttl_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ReportsSection {
    fn default() -> Self {
        Self {
            dedupe_dispatch: true,
            claim_ttl_secs: 600,
            poll_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub stale_after_days: i64,
    pub max_concurrent_fetches: usize,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 3600,
            stale_after_days: 14,
            max_concurrent_fetches: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubSection {
    pub api_base: String,
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
    /// Also write daily-rotated log files here.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub reports: ReportsSection,
    pub coordinator: CoordinatorSection,
    pub github: GitHubSection,
    pub retry: RetrySection,
    pub logging: LoggingSection,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse testboard.toml")
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// File, then process environment.
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TESTBOARD_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("TESTBOARD_PORT") {
            self.server.port = parse_env("TESTBOARD_PORT", &v)?;
        }
        if let Some(v) = get("TESTBOARD_DB_PATH") {
            self.server.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("TESTBOARD_DEV_MODE") {
            self.server.dev_mode = parse_bool("TESTBOARD_DEV_MODE", &v)?;
        }
        if let Some(v) = get("TESTBOARD_DEDUPE_DISPATCH") {
            self.reports.dedupe_dispatch = parse_bool("TESTBOARD_DEDUPE_DISPATCH", &v)?;
        }
        if let Some(v) = get("TESTBOARD_CLAIM_TTL_SECS") {
            self.reports.claim_ttl_secs = parse_env("TESTBOARD_CLAIM_TTL_SECS", &v)?;
        }
        if let Some(v) = get("TESTBOARD_POLL_INTERVAL_MS") {
            self.reports.poll_interval_ms = parse_env("TESTBOARD_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("TESTBOARD_COORDINATOR_ENABLED") {
            self.coordinator.enabled = parse_bool("TESTBOARD_COORDINATOR_ENABLED", &v)?;
        }
        if let Some(v) = get("TESTBOARD_STALE_AFTER_DAYS") {
            self.coordinator.stale_after_days = parse_env("TESTBOARD_STALE_AFTER_DAYS", &v)?;
        }
        if let Some(v) = get("TESTBOARD_GITHUB_API_BASE") {
            self.github.api_base = v;
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = Some(v.trim().to_string());
        }
        if let Some(v) = get("TESTBOARD_LOG_JSON") {
            self.logging.json = parse_bool("TESTBOARD_LOG_JSON", &v)?;
        }
        if let Some(v) = get("TESTBOARD_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Return human-readable warnings for questionable settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.reports.poll_interval_ms == 0 {
            warnings.push("reports.poll_interval_ms is 0; clients will poll continuously".to_string());
        }
        if self.reports.dedupe_dispatch && self.reports.claim_ttl_secs == 0 {
            warnings.push(
                "reports.claim_ttl_secs is 0; concurrent readers will each dispatch".to_string(),
            );
        }
        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; treating as 1".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            warnings.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if self.coordinator.enabled && self.github.token.is_none() {
            warnings.push(
                "coordinator is enabled without GITHUB_TOKEN; GitHub rate limits will be low"
                    .to_string(),
            );
        }
        if self.coordinator.max_concurrent_fetches == 0 {
            warnings.push("coordinator.max_concurrent_fetches is 0; treating as 1".to_string());
        }
        warnings
    }

    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings {
            dedupe_dispatch: self.reports.dedupe_dispatch,
            claim_ttl: Duration::from_secs(self.reports.claim_ttl_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            stale_after_days: self.coordinator.stale_after_days,
            max_concurrent_fetches: self.coordinator.max_concurrent_fetches.max(1),
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            interval: Duration::from_millis(self.reports.poll_interval_ms),
            ..PollerSettings::default()
        }
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("Invalid {}='{}': expected true or false", key, value),
    }
}
