//! Dome configuration and its on-disk storage.
//!
//! Configuration lives in `~/.cf_config/dome.json` by default. Every field has
//! a default, so a partial file (or none at all) is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::DEFAULT_TIMEOUT;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Simulated hardware parameters. One tick is one poll period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Degrees per tick while far from the target.
    pub fast_speed: f64,
    /// Degrees per tick for the final approach.
    pub slow_speed: f64,
    /// Ticks for the shutter to finish travelling.
    pub shutter_ticks: u32,
    /// Ticks for the flap to finish travelling.
    pub flap_ticks: u32,
    /// Azimuth the simulated dome starts at.
    pub initial_azimuth: f64,
    /// Start with the reference sensor already seen.
    pub start_synced: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fast_speed: 5.0,
            slow_speed: 0.5,
            shutter_ticks: 5,
            flap_ticks: 5,
            initial_azimuth: 0.0,
            start_synced: false,
        }
    }
}

/// Runtime configuration of one dome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomeConfig {
    /// Serial device of the controller.
    pub port: String,
    pub baud_rate: u32,
    /// Reply timeout per command, milliseconds.
    pub command_timeout_ms: u64,
    /// Poll period, milliseconds.
    pub poll_interval_ms: u64,
    /// Arrival tolerance in degrees.
    pub autosync_tolerance: f64,
    pub park_azimuth: f64,
    pub home_azimuth: f64,
    pub simulation: SimConfig,
}

impl Default for DomeConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            command_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 1000,
            autosync_tolerance: 1.0,
            park_azimuth: 0.0,
            home_azimuth: 0.0,
            simulation: SimConfig::default(),
        }
    }
}

impl DomeConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values the controller cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_circle = |v: f64| (0.0..360.0).contains(&v);

        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid("command_timeout_ms must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if !(self.autosync_tolerance > 0.0 && self.autosync_tolerance <= 10.0) {
            return Err(ConfigError::Invalid(format!(
                "autosync_tolerance {} outside (0, 10]",
                self.autosync_tolerance
            )));
        }
        if !in_circle(self.park_azimuth) || !in_circle(self.home_azimuth) {
            return Err(ConfigError::Invalid(
                "park and home azimuth must be within [0, 360)".into(),
            ));
        }

        let sim = &self.simulation;
        if !(sim.fast_speed > 0.0 && sim.slow_speed > 0.0 && sim.slow_speed <= sim.fast_speed) {
            return Err(ConfigError::Invalid(
                "simulation speeds must be positive with slow <= fast".into(),
            ));
        }
        if !in_circle(sim.initial_azimuth) {
            return Err(ConfigError::Invalid(
                "simulation initial_azimuth must be within [0, 360)".into(),
            ));
        }
        Ok(())
    }
}

/// Loads and saves [`DomeConfig`] under a configuration root.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root_path: PathBuf,
}

impl ConfigStore {
    const FILE_NAME: &'static str = "dome.json";

    /// Store rooted at `~/.cf_config`.
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::NotFound, "HOME not set"))?;
        Ok(Self {
            root_path: PathBuf::from(home).join(".cf_config"),
        })
    }

    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn config_path(&self) -> PathBuf {
        self.root_path.join(Self::FILE_NAME)
    }

    /// Returns None if no config file exists, Some(Err) if it cannot be read.
    pub fn load(&self) -> Option<Result<DomeConfig, ConfigError>> {
        let path = self.config_path();
        if !path.exists() {
            return None;
        }
        Some(Self::load_from_file(&path))
    }

    /// Load an explicit file, e.g. one passed on the command line.
    pub fn load_from_file(path: &Path) -> Result<DomeConfig, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: DomeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config, creating the root directory if needed.
    pub fn save(&self, config: &DomeConfig) -> Result<PathBuf, ConfigError> {
        config.validate()?;
        std::fs::create_dir_all(&self.root_path)?;
        let path = self.config_path();
        std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
        Ok(path)
    }
}
