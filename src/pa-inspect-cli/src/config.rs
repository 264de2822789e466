//! Configuration management for pa-inspect

use anyhow::{Context, Result};
use pa_inspect::{
    layout::{MAX_SMALL_SLOT_SIZE, NEEDLE_ARRAY_LEN, REGISTRY_SLOT},
    InspectOptions, ListLimit, ScanOptions, DEFAULT_MAX_REGION_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interval_ms: u64,
    pub max_scan_region_size: usize,
    pub needle_array_len: usize,
    pub registry_slot: usize,
    /// Unset: the root comes from the first thread cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_slot: Option<usize>,
    /// 0 = unbounded
    pub max_list_length: usize,
    pub max_bucket_slot_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval_ms: 200,
            max_scan_region_size: DEFAULT_MAX_REGION_SIZE,
            needle_array_len: NEEDLE_ARRAY_LEN,
            registry_slot: REGISTRY_SLOT,
            root_slot: None,
            max_list_length: 0,
            max_bucket_slot_size: MAX_SMALL_SLOT_SIZE,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("pa-inspect");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from `path`, or the defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory at {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Command-line flags take precedence over file values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(interval_ms) = cli.interval_ms {
            self.interval_ms = interval_ms;
        }
        if let Some(size) = cli.max_scan_region_size {
            self.max_scan_region_size = size;
        }
        if let Some(len) = cli.needle_array_len {
            self.needle_array_len = len;
        }
        if let Some(slot) = cli.registry_slot {
            self.registry_slot = slot;
        }
        if cli.root_slot.is_some() {
            self.root_slot = cli.root_slot;
        }
        if let Some(max) = cli.max_list_length {
            self.max_list_length = max;
        }
        if let Some(size) = cli.max_bucket_slot_size {
            self.max_bucket_slot_size = size;
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn inspect_options(&self) -> InspectOptions {
        InspectOptions {
            scan: ScanOptions {
                max_region_size: self.max_scan_region_size,
                array_len: self.needle_array_len,
            },
            registry_slot: self.registry_slot,
            root_slot: self.root_slot,
            list_limit: ListLimit::new(self.max_list_length),
            max_bucket_slot_size: self.max_bucket_slot_size,
            ..InspectOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            interval_ms: 1000,
            max_list_length: 4096,
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "needle_array_len = 4\nroot_slot = 2\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.needle_array_len, 4);
        assert_eq!(config.root_slot, Some(2));
        assert_eq!(config.registry_slot, REGISTRY_SLOT);
        assert_eq!(config.max_scan_region_size, DEFAULT_MAX_REGION_SIZE);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "interval_ms = \"soon\"\n").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_flags_override_file_values() {
        let mut config = Config {
            interval_ms: 1000,
            root_slot: Some(2),
            ..Config::default()
        };
        let cli = Cli::try_parse_from([
            "pa-inspect",
            "--pid=1",
            "--interval-ms=50",
            "--max-list-length=10",
            "--max-bucket-slot-size=1024",
        ])
        .unwrap();

        config.apply_overrides(&cli);
        assert_eq!(config.interval_ms, 50);
        assert_eq!(config.max_list_length, 10);
        assert_eq!(config.root_slot, Some(2));
        assert_eq!(config.max_bucket_slot_size, 1024);
    }

    #[test]
    fn test_inspect_options_mapping() {
        let config = Config {
            max_scan_region_size: 1 << 20,
            needle_array_len: 4,
            root_slot: Some(2),
            max_list_length: 8,
            ..Config::default()
        };
        let options = config.inspect_options();
        assert_eq!(options.scan.max_region_size, 1 << 20);
        assert_eq!(options.scan.array_len, 4);
        assert_eq!(options.root_slot, Some(2));
        assert_eq!(options.max_bucket_slot_size, MAX_SMALL_SLOT_SIZE);
        assert_eq!(options.list_limit, ListLimit::new(8));
    }

    #[test]
    fn test_defaults_use_three_word_needle() {
        let options = Config::default().inspect_options();
        assert_eq!(options.scan.array_len, 3);
        assert_eq!(options.registry_slot, 1);
        assert_eq!(options.root_slot, None);
    }
}
