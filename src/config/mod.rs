//! Configuration module
//!
//! Handles application settings stored as TOML in the platform config directory

mod settings;

pub use settings::{AppConfig, LoggingConfig, PlaybackSettings, SerialSettings};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Config file name inside [`config_dir`]
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Platform has no config directory for this user
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid configuration
    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        /// File that failed to parse
        path: PathBuf,
        /// TOML error
        #[source]
        source: toml::de::Error,
    },

    /// Config could not be rendered
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "serial-broadcast", "SerialBroadcast")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the configuration file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}
