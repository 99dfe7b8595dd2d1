//! Recorder configuration.
//!
//! The core never parses configuration files. An external loader builds a
//! [`RecorderConfig`] (the serde derives make that trivial from TOML, YAML or
//! JSON) and the recorder validates it once at construction time.

use crate::defaults;
use crate::error::{Result, SoundlogError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RecorderConfig {
    pub capture: CaptureConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub device: DeviceConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_duration_secs: u32,
}

/// Session segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub silence_threshold: f32,
    pub silence_gap_secs: u32,
    pub min_session_secs: u32,
}

/// Storage and retention configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub retention_days: u32,
    pub auto_cleanup: bool,
}

/// Device selection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub selection: DeviceSelection,
    /// Fallback when probing finds no active device.
    pub preferred_device: Option<String>,
    /// Case-insensitive name substrings that must never be opened for probing.
    pub blacklist: Vec<String>,
}

/// How the capture device is chosen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DeviceSelection {
    /// Probe all candidate devices and pick the loudest active one.
    Auto,
    /// Open the named device without probing.
    Named(String),
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_gap_secs: defaults::SILENCE_GAP_SECS,
            min_session_secs: defaults::MIN_SESSION_SECS,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("soundlog_data"),
            retention_days: defaults::RETENTION_DAYS,
            auto_cleanup: true,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            selection: DeviceSelection::Auto,
            preferred_device: None,
            blacklist: defaults::DEVICE_BLACKLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl RecorderConfig {
    /// Validates the configuration, returning the first offending value.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> SoundlogError {
            SoundlogError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.capture.sample_rate == 0 {
            return Err(invalid("capture.sample_rate", "must be positive"));
        }
        if self.capture.channels == 0 || self.capture.channels > 2 {
            return Err(invalid("capture.channels", "must be 1 (mono) or 2 (stereo)"));
        }
        if self.capture.chunk_duration_secs == 0 {
            return Err(invalid("capture.chunk_duration_secs", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.session.silence_threshold) {
            return Err(invalid(
                "session.silence_threshold",
                "must be in the range [0.0, 1.0)",
            ));
        }
        if self.session.silence_gap_secs == 0 {
            return Err(invalid("session.silence_gap_secs", "must be positive"));
        }
        if self.storage.retention_days == 0 {
            return Err(invalid("storage.retention_days", "must be at least one day"));
        }
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(invalid("storage.data_dir", "must not be empty"));
        }
        if let DeviceSelection::Named(name) = &self.device.selection
            && name.is_empty()
        {
            return Err(invalid("device.selection", "device name must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RecorderConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = RecorderConfig::default();
        assert_eq!(config.capture.sample_rate, 16_000);
        assert_eq!(config.capture.channels, 1);
        assert_eq!(config.capture.chunk_duration_secs, 30);
        assert_eq!(config.session.silence_gap_secs, 60);
        assert_eq!(config.session.min_session_secs, 30);
        assert_eq!(config.storage.retention_days, 30);
        assert!(config.storage.auto_cleanup);
        assert_eq!(config.device.selection, DeviceSelection::Auto);
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let mut config = RecorderConfig::default();
        config.capture.sample_rate = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capture.sample_rate"));
    }

    #[test]
    fn test_surround_channel_count_rejected() {
        let mut config = RecorderConfig::default();
        config.capture.channels = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_silence_threshold_range() {
        let mut config = RecorderConfig::default();
        config.session.silence_threshold = 1.0;
        assert!(config.validate().is_err());

        config.session.silence_threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_named_device_rejected() {
        let mut config = RecorderConfig::default();
        config.device.selection = DeviceSelection::Named(String::new());
        assert!(config.validate().is_err());

        config.device.selection = DeviceSelection::Named("pipewire".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserializes_with_partial_input() {
        // An external loader hands us whatever subset the user wrote;
        // everything else falls back to defaults.
        let json = r#"{ "session": { "silence_gap_secs": 90 } }"#;
        let config: RecorderConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.session.silence_gap_secs, 90);
        assert_eq!(config.capture.sample_rate, 16_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_blacklist_covers_microphones() {
        let config = RecorderConfig::default();
        assert!(config.device.blacklist.iter().any(|p| p == "microphone"));
    }
}
