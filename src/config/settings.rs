//! Application settings

use super::ConfigError;
use crate::core::events::{EventBus, DEFAULT_CAPACITY};
use crate::core::transport::{LinkSettings, DEFAULT_BAUD_RATE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial line settings
    pub serial: SerialSettings,
    /// Playback settings
    pub playback: PlaybackSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the platform config file; missing file gives defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&super::config_path().ok_or(ConfigError::NoConfigDir)?)
    }

    /// Load config from `path`; missing file gives defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to the platform config file
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Line settings for every device connect
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings::new(self.serial.baud_rate)
            .read_timeout(Duration::from_millis(self.serial.read_timeout_ms))
            .write_timeout(Duration::from_millis(self.serial.write_timeout_ms))
    }

    /// Event bus for playing `timeline_len` events
    pub fn event_bus(&self, timeline_len: usize) -> EventBus {
        EventBus::for_timeline(self.playback.event_capacity, timeline_len)
    }

    /// Interval between scheduler ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.playback.tick_interval_ms)
    }
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Default baud rate
    pub baud_rate: u32,
    /// Read timeout (milliseconds)
    pub read_timeout_ms: u64,
    /// Write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 500,
            write_timeout_ms: 500,
        }
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Tick interval (milliseconds)
    pub tick_interval_ms: u64,
    /// End playback once every device has been evicted
    pub stop_when_no_devices: bool,
    /// Minimum status event backlog; grown to fit the loaded timeline
    pub event_capacity: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            stop_when_no_devices: false,
            event_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. `info`, `serial_broadcast_core=debug`)
    pub level: String,
    /// Also write logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.tick_interval(), Duration::from_millis(10));
        assert!(!config.playback.stop_when_no_devices);
        assert_eq!(config.event_bus(10).capacity(), 1024);
        assert!(config.event_bus(4000).capacity() > 4000);

        let link = config.link_settings();
        assert_eq!(link.write_timeout, Duration::from_millis(500));
        assert_eq!(link.read_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.serial.baud_rate = 115_200;
        config.playback.stop_when_no_devices = true;
        config.logging.file = Some(PathBuf::from("/tmp/playback.log"));
        config.save_to(&path).unwrap();

        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[playback]\ntick_interval_ms = 25\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(25));
        assert_eq!(config.serial, SerialSettings::default());
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[serial]\nbaud_rate = \"fast\"\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
