use crate::accuracy::AccuracyThresholds;
use crate::errors::{ConfigError, ConfigResult};
use crate::messages::AccuracyLevel;
use serde::Deserialize;
use std::fs;

/// Root of `monitor.toml`: one `[monitor]` table and one `[source]` table
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,
    pub source: SourceEntry,
}

/// Behaviour of the accuracy monitor itself
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Level below which subscribers are told to calibrate
    #[serde(default = "default_required_accuracy")]
    pub required_accuracy: AccuracyLevel,
    #[serde(flatten)]
    pub thresholds: AccuracyThresholds,
    /// Capacity of the inbound command queue
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Events queued per subscriber before it is dropped as too slow
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            required_accuracy: default_required_accuracy(),
            thresholds: AccuracyThresholds::default(),
            command_buffer: default_command_buffer(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// The heading source, matching the `[source]` section
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub driver: String,
    /// Sampling rate in Hz
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    /// Local magnetic declination, east positive (degrees)
    #[serde(default)]
    pub declination_deg: f64,
    #[serde(default = "default_accuracy_deg")]
    pub accuracy_deg: f64,
    #[serde(default = "default_rotation")]
    pub rotation_deg_per_sec: f64,
    /// Set to false to emulate a device without compass hardware
    #[serde(default = "default_available")]
    pub available: bool,
}

impl Default for SourceEntry {
    fn default() -> Self {
        Self {
            id: "compass0".to_string(),
            driver: "simulated".to_string(),
            frequency: default_frequency(),
            declination_deg: 0.0,
            accuracy_deg: default_accuracy_deg(),
            rotation_deg_per_sec: default_rotation(),
            available: default_available(),
        }
    }
}

fn default_required_accuracy() -> AccuracyLevel {
    AccuracyLevel::High
}

fn default_command_buffer() -> usize {
    32
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_frequency() -> u32 {
    10
}

fn default_accuracy_deg() -> f64 {
    10.0
}

fn default_rotation() -> f64 {
    5.0
}

fn default_available() -> bool {
    true
}

impl HubConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.monitor.required_accuracy == AccuracyLevel::Unknown {
            return Err(invalid("monitor.required_accuracy", "must be a ranked level"));
        }
        let t = &self.monitor.thresholds;
        if t.high_max_deg.is_nan() || t.high_max_deg < 0.0 {
            return Err(invalid("monitor.high_max_deg", "must be a non-negative number"));
        }
        if t.medium_max_deg.is_nan() || t.medium_max_deg < t.high_max_deg {
            return Err(invalid(
                "monitor.medium_max_deg",
                "must be greater than or equal to high_max_deg",
            ));
        }
        if self.monitor.command_buffer == 0 {
            return Err(invalid("monitor.command_buffer", "must be at least 1"));
        }
        if self.monitor.subscriber_buffer == 0 {
            return Err(invalid("monitor.subscriber_buffer", "must be at least 1"));
        }
        if self.source.frequency == 0 {
            return Err(invalid("source.frequency", "must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses and validates config from TOML text
pub fn parse_hub_config(content: &str) -> ConfigResult<HubConfig> {
    let parsed: HubConfig = toml::from_str(content)?;
    parsed.validate()?;
    Ok(parsed)
}

/// Loads config from TOML file
pub fn load_hub_config(path: &str) -> ConfigResult<HubConfig> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::LoadError {
        path: path.to_string(),
        source: e,
    })?;
    parse_hub_config(&content)
}
