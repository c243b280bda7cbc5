use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod app;
pub mod backend;
pub mod data_url;
pub mod detector;
pub mod error;
pub mod history;
pub mod hotkeys;
pub mod idle;
#[cfg(unix)]
pub mod ipc;
pub mod message;
pub mod reader;
pub mod scheduler;
pub mod snapshot;
pub mod watcher;

pub use app::ClipboardApp;
pub use error::ClipError;
pub use history::{CapacityPolicy, HistoryEntry, HistoryStore};
pub use message::{InboundMessage, OutboundMessage};
pub use snapshot::{ContentKind, ContentSnapshot};
pub use watcher::{ClipboardChange, ClipboardWatcher};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub poll_interval_ms: u64,
    pub max_history_entries: usize,
    pub idle_threshold_ms: u64,
    pub idle_check_interval_ms: u64,
    pub allow_pinned_overflow: bool,
    pub register_hotkeys: bool,
    pub capture_on_start: bool,
    pub socket_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_history_entries: 20,
            idle_threshold_ms: 5000,
            idle_check_interval_ms: 1000,
            allow_pinned_overflow: false,
            register_hotkeys: true,
            capture_on_start: false,
            socket_path: std::env::temp_dir().join("pinclip.sock"),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("pinclip")
            .join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::default_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_path, toml::to_string_pretty(&config)?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_history_entries == 0 {
            bail!("max_history_entries must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if self.idle_check_interval_ms == 0 {
            bail!("idle_check_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn capacity_policy(&self) -> CapacityPolicy {
        if self.allow_pinned_overflow {
            CapacityPolicy::AllowPinnedOverflow
        } else {
            CapacityPolicy::Strict
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_keys_use_defaults() {
        let (_dir, path) = write_config("max_history_entries = 50\n");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.max_history_entries, 50);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.capacity_policy(), CapacityPolicy::Strict);
    }

    #[test]
    fn defaults_survive_a_toml_round_trip() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let (_dir, path) = write_config(&text);
        assert_eq!(Config::load_from(&path).unwrap(), Config::default());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let (_dir, path) = write_config("max_history_entries = 0\n");
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_history_entries"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = Config {
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overflow_flag_selects_policy() {
        let (_dir, path) = write_config("allow_pinned_overflow = true\n");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.capacity_policy(), CapacityPolicy::AllowPinnedOverflow);
    }

    #[test]
    fn garbage_is_an_error() {
        let (_dir, path) = write_config("max_history_entries = \"lots\"\n");
        assert!(Config::load_from(&path).is_err());
    }
}
