// src/config.rs
//! Configuration stored as JSON under the user's config directory

use crate::{
    auto_record::AutoModeSettings,
    error::{LapError, Result},
    geo::SpeedUnit,
    geofence::DetectorSettings,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Gpsd,
    Serial,
    Replay,
}

impl std::str::FromStr for SourceType {
    type Err = LapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gpsd" => Ok(Self::Gpsd),
            "serial" => Ok(Self::Serial),
            "replay" => Ok(Self::Replay),
            other => Err(LapError::InvalidConfig(format!(
                "unknown source type '{}' (expected gpsd, serial or replay)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LapTimerConfig {
    pub source_type: SourceType,
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub replay_path: Option<PathBuf>,
    pub replay_speedup: f64,
    pub detector: DetectorSettings,
    pub auto_mode: AutoModeSettings,
    pub speed_unit: SpeedUnit,
    /// Defaults to `$HOME/.local/share/gps-laptimer/sessions.json` when unset
    pub archive_path: Option<PathBuf>,
}

impl Default for LapTimerConfig {
    fn default() -> Self {
        Self {
            source_type: SourceType::Gpsd,
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            replay_path: None,
            replay_speedup: 1.0,
            detector: DetectorSettings::default(),
            auto_mode: AutoModeSettings::default(),
            speed_unit: SpeedUnit::default(),
            archive_path: None,
        }
    }
}

impl LapTimerConfig {
    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| LapError::Other(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            LapError::InvalidConfig(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LapError::Other(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|e| LapError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| LapError::Other("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("gps-laptimer")
            .join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.auto_mode.validate()?;

        if !self.replay_speedup.is_finite() || self.replay_speedup <= 0.0 {
            return Err(LapError::InvalidConfig(format!(
                "replay speed-up must be positive, got {}",
                self.replay_speedup
            )));
        }
        if self.source_type == SourceType::Serial && self.serial_port.is_none() {
            return Err(LapError::InvalidConfig(
                "serial source needs a port".to_string(),
            ));
        }
        if self.source_type == SourceType::Replay && self.replay_path.is_none() {
            return Err(LapError::InvalidConfig(
                "replay source needs a file".to_string(),
            ));
        }
        Ok(())
    }

    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = SourceType::Serial;
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = SourceType::Gpsd;
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }

    pub fn update_replay(&mut self, path: PathBuf, speedup: f64) {
        self.source_type = SourceType::Replay;
        self.replay_path = Some(path);
        self.replay_speedup = speedup;
    }
}
