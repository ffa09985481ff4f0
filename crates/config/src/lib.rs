//! Configuration loading, validation, and management for NestClaw.
//!
//! Loads configuration from `~/.nestclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use nestclaw_core::agent::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_ITERATIONS, ToolExecutionMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.nestclaw/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model for top-level agent runs
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentLoopConfig,

    /// Sub-agent factory settings
    #[serde(default)]
    pub subagents: SubAgentConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_model() -> String {
    "default".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Maximum provider rounds per turn (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// How tool calls within one round are scheduled
    #[serde(default)]
    pub tool_execution: ToolExecutionMode,

    /// Use the provider's streaming interface
    #[serde(default)]
    pub streaming: bool,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_execution: ToolExecutionMode::default(),
            streaming: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentConfig {
    /// Hard ceiling on sub-agent runs in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum provider rounds per sub-agent run
    #[serde(default = "default_subagent_iterations")]
    pub max_iterations: u32,

    /// Keep only the most recent N completed runs (unset = unbounded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
fn default_subagent_iterations() -> u32 {
    10
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_iterations: default_subagent_iterations(),
            history_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.nestclaw/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `NESTCLAW_MODEL`
    /// - `NESTCLAW_MAX_ITERATIONS`
    /// - `NESTCLAW_MAX_SUBAGENTS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("NESTCLAW_MODEL") {
            self.default_model = model;
        }
        if let Some(raw) = lookup("NESTCLAW_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_env("NESTCLAW_MAX_ITERATIONS", &raw)?;
        }
        if let Some(raw) = lookup("NESTCLAW_MAX_SUBAGENTS") {
            self.subagents.max_concurrent = parse_env("NESTCLAW_MAX_SUBAGENTS", &raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".nestclaw")
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError("agent.max_iterations must be >= 1".into()));
        }

        if self.subagents.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "subagents.max_concurrent must be >= 1".into(),
            ));
        }

        if self.subagents.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "subagents.max_iterations must be >= 1".into(),
            ));
        }

        if self.subagents.history_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "subagents.history_limit must be >= 1 when set".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentLoopConfig::default(),
            subagents: SubAgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} must be a positive integer, got {raw:?}")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for nestclaw_core::Error {
    fn from(e: ConfigError) -> Self {
        nestclaw_core::Error::Config { message: e.to_string() }
    }
}
