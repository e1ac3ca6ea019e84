//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tether/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tether/` (~/.config/tether/)
//! - Data: `$XDG_DATA_HOME/tether/` (~/.local/share/tether/)
//! - State/Logs: `$XDG_STATE_HOME/tether/` (~/.local/state/tether/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Liveness tracking
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Heartbeat reporting
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Checkpoint capture and retention
    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Session footer rendering
    #[serde(default)]
    pub footer: FooterConfig,

    /// Background failure reporting
    #[serde(default)]
    pub failures: FailuresConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Instance registry configuration
#[derive(Debug, Deserialize)]
pub struct RegistryConfig {
    /// Seconds without a heartbeat before an instance counts as stale
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_stale_after_secs() -> i64 {
    crate::registry::STALE_THRESHOLD_SECS
}

/// Heartbeat configuration
#[derive(Debug, Deserialize)]
pub struct HeartbeatConfig {
    /// Synchronous heartbeats slower than this are logged
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

fn default_slow_threshold_ms() -> u64 {
    20
}

/// Checkpoint configuration
#[derive(Debug, Deserialize)]
pub struct CheckpointConfig {
    /// Days to keep checkpoints before `cleanup` removes them
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Cap on the modified-files ledger captured per checkpoint
    #[serde(default = "default_max_modified_files")]
    pub max_modified_files: usize,

    /// Number of command-log entries embedded in a checkpoint
    #[serde(default = "default_recent_commands")]
    pub recent_commands: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            max_modified_files: default_max_modified_files(),
            recent_commands: default_recent_commands(),
        }
    }
}

fn default_retention_days() -> u32 {
    7
}

fn default_max_modified_files() -> usize {
    50
}

fn default_recent_commands() -> usize {
    10
}

/// Footer configuration
#[derive(Debug, Deserialize)]
pub struct FooterConfig {
    /// Context percentage above which the footer carries a resume hint
    #[serde(default = "default_resume_hint_percent")]
    pub resume_hint_percent: u8,
}

impl Default for FooterConfig {
    fn default() -> Self {
        Self {
            resume_hint_percent: default_resume_hint_percent(),
        }
    }
}

fn default_resume_hint_percent() -> u8 {
    70
}

/// Background failure channel configuration
#[derive(Debug, Deserialize)]
pub struct FailuresConfig {
    /// Bounded capacity of the failure channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for FailuresConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    256
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break liveness or footer semantics
    pub fn validate(&self) -> Result<()> {
        if self.registry.stale_after_secs <= 0 {
            return Err(Error::Config(
                "registry.stale_after_secs must be positive".to_string(),
            ));
        }
        if self.footer.resume_hint_percent > 100 {
            return Err(Error::Config(
                "footer.resume_hint_percent must be between 0 and 100".to_string(),
            ));
        }
        if self.failures.channel_capacity == 0 {
            return Err(Error::Config(
                "failures.channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tether/config.toml` (~/.config/tether/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tether").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/tether/` (~/.local/share/tether/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tether")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tether/` (~/.local/state/tether/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tether")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/tether/tether.db` (~/.local/share/tether/tether.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("tether.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("tether.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.registry.stale_after_secs, 120);
        assert_eq!(config.heartbeat.slow_threshold_ms, 20);
        assert_eq!(config.checkpoint.retention_days, 7);
        assert_eq!(config.footer.resume_hint_percent, 70);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[logging]
level = "debug"

[registry]
stale_after_secs = 300

[checkpoint]
retention_days = 14
max_modified_files = 20

[footer]
resume_hint_percent = 85
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.registry.stale_after_secs, 300);
        assert_eq!(config.checkpoint.retention_days, 14);
        assert_eq!(config.checkpoint.max_modified_files, 20);
        assert_eq!(config.checkpoint.recent_commands, 10);
        assert_eq!(config.footer.resume_hint_percent, 85);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config: Config = toml::from_str("[registry]\nstale_after_secs = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[footer]\nresume_hint_percent = 150\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[heartbeat]\nslow_threshold_ms = 50\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.heartbeat.slow_threshold_ms, 50);
    }

    #[test]
    fn test_paths_are_namespaced() {
        assert!(Config::database_path().ends_with("tether/tether.db"));
        assert!(Config::config_path().ends_with("tether/config.toml"));
    }
}
