use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fanout::WorkerBounds;

/// Main configuration structure for starfeed
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Feed output and age window
    #[serde(default)]
    pub feed: FeedConfig,

    /// Concurrency and HTTP behaviour shared by all providers
    #[serde(default)]
    pub fetch: FetchConfig,

    /// GitHub starred repositories
    #[serde(default)]
    pub github: GitHubConfig,

    /// GitLab starred projects
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Codeberg starred repositories
    #[serde(default)]
    pub codeberg: CodebergConfig,

    /// Additional Forgejo/Gitea instances
    #[serde(default)]
    pub forgejo: Vec<ForgejoInstance>,

    /// SourceHut repositories (SourceHut has no stars, so they are listed here)
    #[serde(default)]
    pub sourcehut: SourceHutConfig,

    /// Periodic polling
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Feed output configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeedConfig {
    /// Where the JSON feed is written ("-" for stdout)
    #[serde(default = "default_output")]
    pub output: String,

    /// Trailing age window, e.g. "90d", "12h"
    #[serde(default = "default_age_limit")]
    pub age_limit: String,

    /// Optional cap on the number of events written
    #[serde(default)]
    pub max_events: Option<usize>,
}

/// Fan-out and HTTP settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    /// Worker floor for repository/page fan-out
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Worker ceiling for repository/page fan-out
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"

    /// Explicit token; takes precedence over GITHUB_TOKEN and the gh CLI
    #[serde(default)]
    pub token: Option<String>,
}

/// GitLab configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitLabConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Falls back to GITLAB_TOKEN
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_gitlab_url")]
    pub base_url: String,
}

/// Codeberg configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CodebergConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Falls back to CODEBERG_TOKEN
    #[serde(default)]
    pub token: Option<String>,
}

/// A self-hosted Forgejo or Gitea instance
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ForgejoInstance {
    /// Short name used as the event provider
    pub name: String,

    pub base_url: String,

    #[serde(default)]
    pub token: Option<String>,
}

/// SourceHut configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceHutConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Falls back to SRHT_TOKEN
    #[serde(default)]
    pub token: Option<String>,

    /// Repositories to watch, as `~user/name`
    #[serde(default)]
    pub repositories: Vec<String>,

    #[serde(default = "default_sourcehut_api")]
    pub api_url: String,

    #[serde(default = "default_sourcehut_web")]
    pub web_url: String,
}

/// Periodic polling configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Poll interval
    #[serde(default = "default_interval")]
    pub interval: String, // "1h"
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_output() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/starfeed/feed.json", data_home)
    } else {
        "${HOME}/.local/share/starfeed/feed.json".to_string()
    }
}
fn default_age_limit() -> String {
    "90d".to_string()
}
fn default_min_workers() -> usize {
    8
}
fn default_max_workers() -> usize {
    20
}
fn default_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("starfeed/{}", env!("CARGO_PKG_VERSION"))
}
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}
fn default_sourcehut_api() -> String {
    "https://git.sr.ht/query".to_string()
}
fn default_sourcehut_web() -> String {
    "https://git.sr.ht".to_string()
}
fn default_interval() -> String {
    "1h".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            age_limit: default_age_limit(),
            max_events: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            auth_method: default_auth_method(),
            token: None,
        }
    }
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            token: None,
            base_url: default_gitlab_url(),
        }
    }
}

impl Default for CodebergConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            token: None,
        }
    }
}

impl Default for SourceHutConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            token: None,
            repositories: Vec::new(),
            api_url: default_sourcehut_api(),
            web_url: default_sourcehut_web(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse duration strings like "30s", "30m", "1h", "90d" into seconds.
/// A bare number is taken as seconds.
pub fn parse_duration(duration_str: &str) -> Result<u64> {
    let duration_str = duration_str.trim().to_lowercase();

    let scaled = |value: &str, unit: u64, what: &str| -> Result<u64> {
        value
            .parse::<u64>()
            .with_context(|| format!("Invalid {} value", what))?
            .checked_mul(unit)
            .with_context(|| format!("Duration too large: {}", duration_str))
    };

    if let Some(value) = duration_str.strip_suffix('s') {
        scaled(value, 1, "seconds")
    } else if let Some(value) = duration_str.strip_suffix('m') {
        scaled(value, 60, "minutes")
    } else if let Some(value) = duration_str.strip_suffix('h') {
        scaled(value, 3600, "hours")
    } else if let Some(value) = duration_str.strip_suffix('d') {
        scaled(value, 86400, "days")
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '90d'")
    }
}

/// Pick the configured token, else a non-empty environment variable
pub fn resolve_token(configured: &Option<String>, env_var: &str) -> Option<String> {
    configured
        .as_ref()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| {
            std::env::var(env_var)
                .ok()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
        })
}

impl GitLabConfig {
    pub fn resolved_token(&self) -> Option<String> {
        resolve_token(&self.token, "GITLAB_TOKEN")
    }
}

impl CodebergConfig {
    pub fn resolved_token(&self) -> Option<String> {
        resolve_token(&self.token, "CODEBERG_TOKEN")
    }
}

impl SourceHutConfig {
    pub fn resolved_token(&self) -> Option<String> {
        resolve_token(&self.token, "SRHT_TOKEN")
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("starfeed").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if self.feed.output != "-" {
            self.feed.output = shellexpand::full(&self.feed.output)
                .context("Failed to expand feed output path")?
                .into_owned();
        }

        Ok(())
    }

    /// Reject settings that cannot produce a sensible run
    pub fn validate(&self) -> Result<()> {
        self.age_limit_secs()?;
        self.watch_interval()?;

        if self.fetch.max_workers == 0 {
            return Err(anyhow!("fetch.max_workers must be at least 1"));
        }

        let mut names: Vec<&str> = vec!["github", "gitlab", "codeberg", "sourcehut"];
        for instance in &self.forgejo {
            if instance.name.trim().is_empty() {
                return Err(anyhow!("Forgejo instance with base_url {} has no name", instance.base_url));
            }
            if names.contains(&instance.name.as_str()) {
                return Err(anyhow!("Duplicate provider name: {}", instance.name));
            }
            names.push(&instance.name);
        }

        Ok(())
    }

    /// Age window in seconds
    pub fn age_limit_secs(&self) -> Result<i64> {
        let secs = parse_duration(&self.feed.age_limit)
            .with_context(|| format!("Invalid feed.age_limit: {}", self.feed.age_limit))?;
        i64::try_from(secs).context("feed.age_limit is too large")
    }

    /// Age window as a chrono duration
    pub fn age_limit(&self) -> Result<chrono::Duration> {
        chrono::Duration::try_seconds(self.age_limit_secs()?).context("feed.age_limit is too large")
    }

    /// Poll interval for watch mode
    pub fn watch_interval(&self) -> Result<std::time::Duration> {
        let secs = parse_duration(&self.watch.interval)
            .with_context(|| format!("Invalid watch.interval: {}", self.watch.interval))?;
        if secs == 0 {
            return Err(anyhow!("watch.interval must be greater than zero"));
        }
        Ok(std::time::Duration::from_secs(secs))
    }

    /// Fan-out bounds for repository and page tasks
    pub fn worker_bounds(&self) -> WorkerBounds {
        WorkerBounds::new(self.fetch.min_workers, self.fetch.max_workers)
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch.timeout)
    }
}
