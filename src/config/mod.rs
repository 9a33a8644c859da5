//! Daemon configuration.
//!
//! aurad reads a single TOML file at startup. Every field has a default so
//! the daemon runs with no file present at all.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::AuradError;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General daemon settings.
    pub general: GeneralConfig,
    /// Audio device settings.
    pub audio: AudioConfig,
    /// Bluetooth policy tuning.
    pub bluetooth: BluetoothConfig,
}

/// General daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log level when RUST_LOG is unset.
    pub log_level: String,
    /// Also write events to daily-rotated files in the daemon log
    /// directory.
    pub log_to_file: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

/// Audio device settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// How long an open device with no streams stays open, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Preferred frame rate when a client does not express one.
    pub default_frame_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 10_000,
            default_frame_rate: 48_000,
        }
    }
}

/// Bluetooth policy tuning.
///
/// The defaults match the behavior headsets have been qualified against;
/// override them only for debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Period between connection-watch ticks, in milliseconds.
    pub conn_watch_period_ms: u64,
    /// Maximum connection-watch ticks before giving up on a device.
    pub conn_watch_max_retries: u32,
    /// Delay before re-resuming an output iodev after a profile switch,
    /// in milliseconds.
    pub profile_switch_delay_ms: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            conn_watch_period_ms: 2_000,
            conn_watch_max_retries: 30,
            profile_switch_delay_ms: 500,
        }
    }
}

impl Config {
    /// Loads configuration from the default path, falling back to defaults
    /// when no file exists.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, AuradError> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, AuradError> {
        let contents = std::fs::read_to_string(path).map_err(|e| AuradError::Config {
            location: path.display().to_string(),
            details: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| AuradError::Config {
            location: path.display().to_string(),
            details: e.to_string(),
        })
    }

    /// Default config file path: `$XDG_CONFIG_HOME/aurad/config.toml`.
    ///
    /// # Errors
    /// Returns error if neither XDG_CONFIG_HOME nor HOME is set.
    pub fn config_path() -> Result<PathBuf, AuradError> {
        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Directory for daemon log files.
    ///
    /// # Errors
    /// Returns error if the directory cannot be determined or created.
    pub fn log_dir() -> Result<PathBuf, AuradError> {
        let dir = Self::base_dir()?.join("logs");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn base_dir() -> Result<PathBuf, AuradError> {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg).join("aurad"));
        }
        let home = std::env::var("HOME").map_err(|_| AuradError::Config {
            location: "environment".to_string(),
            details: "neither XDG_CONFIG_HOME nor HOME is set".to_string(),
        })?;
        Ok(PathBuf::from(home).join(".config").join("aurad"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn config_default() {
        let config = Config::default();

        assert_eq!(config.bluetooth.conn_watch_period_ms, 2_000);
        assert_eq!(config.bluetooth.conn_watch_max_retries, 30);
        assert_eq!(config.bluetooth.profile_switch_delay_ms, 500);
        assert_eq!(config.audio.default_frame_rate, 48_000);
        assert!(!config.general.log_to_file);
    }

    #[test]
    fn config_deserialize_toml() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [bluetooth]
            conn_watch_max_retries = 5
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.bluetooth.conn_watch_max_retries, 5);
        assert_eq!(config.bluetooth.conn_watch_period_ms, 2_000);
    }

    #[test]
    fn config_empty_toml() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.audio.idle_timeout_ms, 10_000);
    }

    #[test]
    fn config_serialize_roundtrip() {
        let original = Config::default();

        let toml_str = toml::to_string(&original).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(format!("{original:?}"), format!("{deserialized:?}"));
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                [general]
                log_to_file = true

                [audio]
                idle_timeout_ms = 250
            "#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert!(config.general.log_to_file);
        assert_eq!(config.audio.idle_timeout_ms, 250);
        assert_eq!(config.bluetooth.conn_watch_max_retries, 30);
    }

    #[test]
    fn load_from_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio\nbroken =").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(AuradError::Config { .. })
        ));
    }

    #[test]
    fn load_from_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            Config::load_from(&dir.path().join("missing.toml")),
            Err(AuradError::Config { .. })
        ));
    }

    #[test]
    fn load_falls_back_to_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());

        let config = Config::load().unwrap();

        assert_eq!(config.bluetooth.conn_watch_max_retries, 30);
        assert_eq!(config.audio.default_frame_rate, 48_000);
    }
}
