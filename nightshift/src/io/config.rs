//! Run configuration stored under `.nightshift/config.toml`, plus secrets
//! read from the environment.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Startup problem that should abort before any stage runs (missing
/// credential, invalid config value). Carried inside `anyhow::Error` so the
/// CLI can map it to a dedicated exit code without string matching.
#[derive(Debug)]
pub struct ConfigError {
    pub reason: String,
}

impl ConfigError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Pipeline configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub branch: BranchConfig,
    pub validation: ValidationConfig,
    pub repair: RepairConfig,
    pub publish: PublishConfig,
    pub memory: MemoryConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model name on the generation endpoint.
    pub name: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    /// Per-request wall-clock timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-1.5-flash".to_string(),
            temperature: 0.7,
            max_output_tokens: 8192,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub rate_limit_wait_secs: u64,
    pub rate_limit_increment_secs: u64,
    pub rate_limit_max_wait_secs: u64,
    pub transient_wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_wait_secs: 20,
            rate_limit_increment_secs: 20,
            rate_limit_max_wait_secs: 120,
            transient_wait_secs: 5,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            rate_limit_wait: Duration::from_secs(self.rate_limit_wait_secs),
            rate_limit_increment: Duration::from_secs(self.rate_limit_increment_secs),
            rate_limit_ceiling: Duration::from_secs(self.rate_limit_max_wait_secs),
            transient_wait: Duration::from_secs(self.transient_wait_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BranchConfig {
    /// First segment of the date-scoped branch name, e.g. `nightshift/2026-08-25`.
    pub prefix: String,
    pub remote: String,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            prefix: "nightshift".to_string(),
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Command to execute for the test suite (e.g. `["pytest","-v"]`).
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate captured test output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            command: vec!["pytest".to_string(), "-v".to_string()],
            timeout_secs: 300,
            output_limit_bytes: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    /// Fix-and-revalidate cycles before flagging for human review.
    pub max_attempts: u32,
    /// Tail of the failure log included in the repair prompt.
    pub failure_log_limit_bytes: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            failure_log_limit_bytes: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Whether to push when repair attempts were exhausted (the branch is
    /// flagged for review either way).
    pub push_on_repair_failure: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            push_on_repair_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Carry a trimmed conversation tail across runs via `.nightshift/memory.json`.
    pub enabled: bool,
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_turns: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Cap for outgoing notification messages, in characters.
    pub max_message_chars: usize,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 4_096,
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Location of the config file under a project root.
    pub fn path(root: &Path) -> PathBuf {
        root.join(".nightshift").join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::new("model.name must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::new("model.temperature must be within 0..=2"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(ConfigError::new("model.request_timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::new("retry.max_attempts must be > 0"));
        }
        if self.branch.prefix.trim().is_empty() {
            return Err(ConfigError::new("branch.prefix must not be empty"));
        }
        if self.branch.remote.trim().is_empty() {
            return Err(ConfigError::new("branch.remote must not be empty"));
        }
        if self.validation.command.is_empty() || self.validation.command[0].trim().is_empty() {
            return Err(ConfigError::new(
                "validation.command must be a non-empty array",
            ));
        }
        if self.validation.timeout_secs == 0 {
            return Err(ConfigError::new("validation.timeout_secs must be > 0"));
        }
        if self.validation.output_limit_bytes == 0 {
            return Err(ConfigError::new("validation.output_limit_bytes must be > 0"));
        }
        if !(1..=3).contains(&self.repair.max_attempts) {
            return Err(ConfigError::new("repair.max_attempts must be within 1..=3"));
        }
        if self.repair.failure_log_limit_bytes == 0 {
            return Err(ConfigError::new(
                "repair.failure_log_limit_bytes must be > 0",
            ));
        }
        if self.notify.max_message_chars == 0 {
            return Err(ConfigError::new("notify.max_message_chars must be > 0"));
        }
        if self.memory.enabled && self.memory.max_turns == 0 {
            return Err(ConfigError::new(
                "memory.max_turns must be > 0 when memory is enabled",
            ));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate().map_err(anyhow::Error::new)?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate().map_err(anyhow::Error::new)?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate().map_err(anyhow::Error::new)?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Out-of-band credentials, read once at startup.
#[derive(Debug, Clone)]
pub struct Secrets {
    pub api_key: String,
    /// Notification endpoint; `None` disables notifications.
    pub webhook_url: Option<String>,
}

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const WEBHOOK_URL_VAR: &str = "NIGHTSHIFT_WEBHOOK_URL";

impl Secrets {
    /// Read secrets from the process environment.
    ///
    /// A missing API key is a configuration error; a missing webhook URL just
    /// disables notifications.
    pub fn from_env() -> Result<Self> {
        let api_key = read_var(API_KEY_VAR).ok_or_else(|| {
            anyhow::Error::new(ConfigError::new(format!("{API_KEY_VAR} is not set")))
        })?;
        Ok(Self {
            api_key,
            webhook_url: read_var(WEBHOOK_URL_VAR),
        })
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
