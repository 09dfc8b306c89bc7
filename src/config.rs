//! Shipper configuration.
//!
//! Loaded once at startup from an optional TOML file, then overridden by CLI
//! flags. Missing keys fall back to the defaults below.
//!
//! ```toml
//! raw_root = "/var/log/vms"
//! raw_filename = "raw.log"
//! output_root = "/var/log/pods"
//! output_filename = "_0.log"
//! poll_interval_ms = 200
//! scan_interval_secs = 5
//! shutdown_timeout_secs = 30
//! # max_workers = 256
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

const APP_NAME: &str = "vmlog-shipper";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} must not be empty")]
    EmptyFilename(&'static str),
    #[error("{field} must be a bare file name, got '{value}'")]
    NotAFileName { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShipperConfig {
    /// One subdirectory per instance, each holding `raw_filename`.
    pub raw_root: PathBuf,
    pub raw_filename: String,
    /// One subdirectory per instance, provisioned by the collector.
    pub output_root: PathBuf,
    pub output_filename: String,
    /// How long a worker sleeps at end of input before checking again.
    pub poll_interval_ms: u64,
    /// Period of the discovery / obsolete-worker pass.
    pub scan_interval_secs: u64,
    /// Upper bound on the drain wait at shutdown.
    pub shutdown_timeout_secs: u64,
    /// Admission bound on concurrently running workers. Unbounded if unset.
    pub max_workers: Option<usize>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("/var/log/vms"),
            raw_filename: "raw.log".to_string(),
            output_root: PathBuf::from("/var/log/pods"),
            output_filename: "_0.log".to_string(),
            poll_interval_ms: 200,
            scan_interval_secs: 5,
            shutdown_timeout_secs: 30,
            max_workers: None,
        }
    }
}

impl ShipperConfig {
    /// Defaults with the two roots replaced.
    pub fn new(raw_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            raw_root: raw_root.into(),
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("load config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_file_name("raw_filename", &self.raw_filename)?;
        check_file_name("output_filename", &self.output_filename)?;
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Zero("scan_interval_secs"));
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::Zero("max_workers"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `<raw_root>/<id>/<raw_filename>`
    pub fn input_path(&self, id: &str) -> PathBuf {
        self.raw_root.join(id).join(&self.raw_filename)
    }

    /// `<output_root>/<id>`
    pub fn output_dir(&self, id: &str) -> PathBuf {
        self.output_root.join(id)
    }

    /// `<output_root>/<id>/<output_filename>`
    pub fn output_path(&self, id: &str) -> PathBuf {
        self.output_dir(id).join(&self.output_filename)
    }
}

fn check_file_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::EmptyFilename(field));
    }
    let is_bare = Path::new(value).file_name().is_some_and(|name| name == value);
    if !is_bare {
        return Err(ConfigError::NotAFileName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// `$XDG_CONFIG_HOME/vmlog-shipper/config.toml`, or the same under
/// `$HOME/.config`. `None` when neither variable is set.
pub fn default_config_path() -> Option<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
    };
    Some(base.join(APP_NAME).join("config.toml"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
