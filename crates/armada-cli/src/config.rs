//! Configuration file management for armada.
//!
//! Provides a TOML-based config file at `~/.config/armada/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use armada_core::scheduler::SchedulerConfig;
use armada_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: Option<u32>,
}

/// Scheduler overrides; anything unset falls back to the built-in default.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SchedulerSection {
    pub worker_count: Option<usize>,
    pub high_priority_ratio: Option<f64>,
    pub poll_interval_secs: Option<u64>,
    pub backoff_secs: Option<u64>,
    pub lease_ttl_secs: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub recovery_interval_secs: Option<u64>,
    pub ssh_key_path: Option<PathBuf>,
    pub uploads_root: Option<PathBuf>,
}

impl SchedulerSection {
    /// Apply the file's overrides on top of the built-in defaults.
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        if let Some(v) = self.worker_count {
            config.worker_count = v;
        }
        if let Some(v) = self.high_priority_ratio {
            config.high_priority_ratio = v;
        }
        if let Some(v) = self.poll_interval_secs {
            config.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.backoff_secs {
            config.backoff = Duration::from_secs(v);
        }
        if let Some(v) = self.lease_ttl_secs {
            config.lease_ttl = Duration::from_secs(v);
        }
        if let Some(v) = self.queue_capacity {
            config.queue_capacity = v;
        }
        if let Some(v) = self.recovery_interval_secs {
            config.recovery_interval = Duration::from_secs(v);
        }
        if let Some(ref v) = self.ssh_key_path {
            config.ssh_key_path = v.clone();
        }
        if let Some(ref v) = self.uploads_root {
            config.uploads_root = Some(v.clone());
        }
        config
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the armada config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/armada` or `~/.config/armada`.
/// We intentionally ignore the platform-specific `dirs::config_dir()`
/// (which returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("armada");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("armada")
}

/// Return the path to the armada config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolution
// -----------------------------------------------------------------------

/// Fully resolved configuration for a CLI invocation.
pub struct ArmadaConfig {
    pub db_config: DbConfig,
    pub scheduler: SchedulerConfig,
}

impl ArmadaConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// The URL chain itself lives in [`DbConfig::resolve`]; this function
    /// contributes the config file's slot in it, applies the file's pool
    /// sizing, and validates the result.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let mut db_config = DbConfig::resolve(
            cli_db_url,
            file_config.as_ref().map(|cfg| cfg.database.url.as_str()),
        );
        if let Some(max) = file_config.as_ref().and_then(|cfg| cfg.database.max_connections) {
            db_config = db_config.with_max_connections(max);
        }
        db_config.validate()?;

        let scheduler = file_config
            .as_ref()
            .map(|cfg| cfg.scheduler.to_scheduler_config())
            .unwrap_or_default();

        Ok(Self {
            db_config,
            scheduler,
        })
    }
}
