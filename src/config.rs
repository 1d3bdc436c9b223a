// Agent configuration and launch preferences

use crate::process::SortMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".config/netpulse";
const CONFIG_FILE: &str = "config.json";

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Per-process accounting utility
    #[serde(default = "default_accounting_utility")]
    pub accounting_utility: PathBuf,

    /// Seconds between ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Seconds a single accounting read may run before it is abandoned
    #[serde(default = "default_sample_timeout_secs")]
    pub sample_timeout_secs: u64,

    /// Combined bytes/sec above which a non-whitelisted process is suspended
    #[serde(default = "default_suspend_threshold")]
    pub suspend_threshold: f64,

    /// Remote policy endpoint; no remote sync when unset
    #[serde(default)]
    pub policy_endpoint: Option<String>,

    /// Periodic remote sync; only startup and manual syncs when unset
    #[serde(default)]
    pub policy_sync_interval_secs: Option<u64>,

    #[serde(default = "default_public_ip_endpoint")]
    pub public_ip_endpoint: String,

    /// Elevation helper; defaults to `harden_agent.sh` beside the executable
    #[serde(default)]
    pub hardening_script: Option<PathBuf>,

    /// Require the current password to set a new one
    #[serde(default)]
    pub require_current_password: bool,

    /// User wants the user-tier auto-start registration
    #[serde(default)]
    pub persistence_enabled: bool,

    #[serde(default)]
    pub has_launched_before: bool,

    #[serde(default)]
    pub sort_mode: SortMode,
}

fn default_accounting_utility() -> PathBuf {
    PathBuf::from("/usr/bin/nettop")
}

fn default_tick_interval_secs() -> u64 {
    2
}

fn default_sample_timeout_secs() -> u64 {
    10
}

fn default_suspend_threshold() -> f64 {
    crate::enforcement::DEFAULT_SUSPEND_THRESHOLD
}

fn default_public_ip_endpoint() -> String {
    "https://api.ipify.org".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounting_utility: default_accounting_utility(),
            tick_interval_secs: default_tick_interval_secs(),
            sample_timeout_secs: default_sample_timeout_secs(),
            suspend_threshold: default_suspend_threshold(),
            policy_endpoint: None,
            policy_sync_interval_secs: None,
            public_ip_endpoint: default_public_ip_endpoint(),
            hardening_script: None,
            require_current_password: false,
            persistence_enabled: false,
            has_launched_before: false,
            sort_mode: SortMode::default(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        let config_dir = PathBuf::from(home).join(CONFIG_DIR);

        // Create config directory if it doesn't exist
        fs::create_dir_all(&config_dir).context(format!(
            "Failed to create config directory: {:?}",
            config_dir
        ))?;

        Ok(config_dir.join(CONFIG_FILE))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_secs(self.sample_timeout_secs.max(1))
    }

    pub fn policy_sync_interval(&self) -> Option<Duration> {
        self.policy_sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.policy_endpoint = Some("https://policy.example.com/get".to_string());
        config.persistence_enabled = true;

        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.policy_endpoint, config.policy_endpoint);
        assert!(deserialized.persistence_enabled);
        assert_eq!(deserialized.sort_mode, SortMode::Speed);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{ "tick_interval_secs": 5 }"#).unwrap();

        assert_eq!(config.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.sample_timeout(), Duration::from_secs(10));
        assert_eq!(config.accounting_utility, PathBuf::from("/usr/bin/nettop"));
        assert_eq!(config.suspend_threshold, 10240.0);
        assert!(config.policy_sync_interval().is_none());
        assert!(!config.require_current_password);
    }

    #[test]
    fn test_load_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        assert!(!Config::load_from(&path).unwrap().has_launched_before);

        let mut config = Config::default();
        config.has_launched_before = true;
        config.save_to(&path).unwrap();

        assert!(Config::load_from(&path).unwrap().has_launched_before);
    }
}
