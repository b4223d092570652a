//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use airq_core::autostore::{AutoStoreConfig, AutoStoreTrigger};
use airq_core::EngineConfig;

use crate::cli::{AutoStoreArgs, DeviceArgs};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default device identifier
    #[serde(default)]
    pub device: Option<String>,

    /// Enable auto-store whenever a sensor is connected
    #[serde(default)]
    pub auto_store: bool,

    /// Minimum seconds between persisted snapshots
    #[serde(default)]
    pub auto_store_interval_secs: Option<u64>,

    /// Auto-store trigger: "timer_and_arrival", "timer" or "arrival"
    #[serde(default)]
    pub trigger: Option<AutoStoreTrigger>,

    /// Connection timeout in seconds
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// File that persisted snapshots are appended to
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("airq")
            .join("config.toml")
    }

    /// Load the configuration, falling back to defaults if it is missing or invalid.
    pub fn load() -> Self {
        let path = Self::path();
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            warn!("{:#}", e);
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

/// Default location of persisted snapshots.
pub fn default_persist_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airq")
        .join("snapshots.jsonl")
}

/// Device from the command line (or `AIRQ_DEVICE`), else from config.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device.or_else(|| config.device.clone())
}

/// Whether auto-store is requested by flag or config.
pub fn resolve_auto_store(args: &AutoStoreArgs, config: &Config) -> bool {
    args.auto_store || config.auto_store
}

/// Where persisted snapshots go: flag, then config, then the default path.
pub fn resolve_persist_path(args: &AutoStoreArgs, config: &Config) -> PathBuf {
    args.persist
        .clone()
        .or_else(|| config.output.clone())
        .unwrap_or_else(default_persist_path)
}

/// Build the auto-store policy. Flags override config.
pub fn auto_store_config(args: &AutoStoreArgs, config: &Config) -> AutoStoreConfig {
    let mut builder = AutoStoreConfig::builder();
    if let Some(secs) = args.store_interval.or(config.auto_store_interval_secs) {
        builder = builder.min_interval(Duration::from_secs(secs));
    }
    if let Some(trigger) = args.trigger.map(AutoStoreTrigger::from).or(config.trigger) {
        builder = builder.trigger(trigger);
    }
    builder.build()
}

/// Build and validate the engine options. Flags override config.
pub fn engine_config(
    device: Option<&DeviceArgs>,
    store: &AutoStoreArgs,
    config: &Config,
) -> Result<EngineConfig> {
    let mut builder = EngineConfig::builder().auto_store(auto_store_config(store, config));
    let connect_timeout = device
        .and_then(|d| d.connect_timeout)
        .or(config.connect_timeout_secs);
    if let Some(secs) = connect_timeout {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }

    let engine_config = builder.build();
    engine_config
        .validate()
        .context("Invalid auto-store or connection settings")?;
    Ok(engine_config)
}
