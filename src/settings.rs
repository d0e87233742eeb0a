//! Engine settings persistence
//!
//! Handles saving and loading user preferences and engine tuning as JSON in
//! the platform config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{ControllerConfig, SpectrumConfig, VisualizerConfig};
use crate::audio::analyzer::{MAX_FFT_SIZE, MIN_FFT_SIZE};

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Volume level (0.0 to 1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub shuffle: bool,
    /// Audio output device name (None = system default)
    #[serde(default)]
    pub device_name: Option<String>,
    /// Playback settings
    #[serde(default)]
    pub playback: PlaybackSettings,
    /// Spectrum analyzer settings
    #[serde(default)]
    pub spectrum: SpectrumSettings,
    /// Bar visualizer settings
    #[serde(default)]
    pub visualizer: VisualizerSettings,
}

/// Playback-related settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Seconds moved by skip forward / backward
    #[serde(default = "default_skip_seconds")]
    pub skip_seconds: f64,
    /// Loads taking longer than this fail
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// Position report cadence
    #[serde(default = "default_position_tick_ms")]
    pub position_tick_ms: u64,
}

/// Spectrum analyzer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSettings {
    /// FFT window length, a power of two
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Spectrum analyzer decay (0.0 = instant, 0.95 = slow)
    #[serde(default = "default_spectrum_decay")]
    pub decay: f32,
    #[serde(default = "default_min_db")]
    pub min_db: f32,
    #[serde(default = "default_max_db")]
    pub max_db: f32,
}

/// Bar visualizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizerSettings {
    #[serde(default = "default_bar_count")]
    pub bar_count: usize,
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Delay between rendered frames
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_volume() -> f32 {
    1.0
}

fn default_skip_seconds() -> f64 {
    10.0
}

fn default_load_timeout_ms() -> u64 {
    15_000
}

fn default_position_tick_ms() -> u64 {
    200
}

fn default_fft_size() -> usize {
    256
}

fn default_spectrum_decay() -> f32 {
    0.85
}

fn default_min_db() -> f32 {
    -60.0
}

fn default_max_db() -> f32 {
    12.0
}

fn default_bar_count() -> usize {
    64
}

fn default_gain() -> f32 {
    1.0
}

fn default_frame_interval_ms() -> u64 {
    16
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            muted: false,
            repeat: false,
            shuffle: false,
            device_name: None,
            playback: PlaybackSettings::default(),
            spectrum: SpectrumSettings::default(),
            visualizer: VisualizerSettings::default(),
        }
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            skip_seconds: default_skip_seconds(),
            load_timeout_ms: default_load_timeout_ms(),
            position_tick_ms: default_position_tick_ms(),
        }
    }
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            decay: default_spectrum_decay(),
            min_db: default_min_db(),
            max_db: default_max_db(),
        }
    }
}

impl Default for VisualizerSettings {
    fn default() -> Self {
        Self {
            bar_count: default_bar_count(),
            gain: default_gain(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tonearm", "Tonearm")
            .map(|dirs| dirs.config_dir().join("settings.json"))
    }

    /// Load settings from file, or return defaults if missing or invalid
    pub fn load() -> Self {
        let Some(path) = Self::file_path() else {
            return Self::default();
        };

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(SettingsError::Io(_)) => Self::default(),
            Err(e) => {
                tracing::warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load and validate settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        let settings: Self =
            serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the default file
    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(path) = Self::file_path() {
            self.save_to_file(&path)
        } else {
            Err(SettingsError::Io(
                "Could not determine config directory".to_string(),
            ))
        }
    }

    /// Save settings to a specific file
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let content =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SettingsError::Io(e.to_string()))?;
        Ok(())
    }

    /// Check values the engine cannot run with
    pub fn validate(&self) -> Result<(), SettingsError> {
        let fft_size = self.spectrum.fft_size;
        if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
            return Err(SettingsError::Invalid(format!(
                "spectrum.fft_size must be a power of two between {} and {}, got {}",
                MIN_FFT_SIZE, MAX_FFT_SIZE, fft_size
            )));
        }
        if !(self.spectrum.max_db > self.spectrum.min_db) {
            return Err(SettingsError::Invalid(
                "spectrum.max_db must be above spectrum.min_db".to_string(),
            ));
        }
        if self.visualizer.bar_count == 0 {
            return Err(SettingsError::Invalid(
                "visualizer.bar_count must be at least 1".to_string(),
            ));
        }
        if self.visualizer.frame_interval_ms == 0 || self.playback.position_tick_ms == 0 {
            return Err(SettingsError::Invalid(
                "intervals must be at least 1 ms".to_string(),
            ));
        }
        if !(self.playback.skip_seconds.is_finite() && self.playback.skip_seconds > 0.0) {
            return Err(SettingsError::Invalid(
                "playback.skip_seconds must be positive".to_string(),
            ));
        }
        if !self.volume.is_finite() {
            return Err(SettingsError::Invalid("volume must be a number".to_string()));
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            skip_seconds: self.playback.skip_seconds,
            load_timeout: Duration::from_millis(self.playback.load_timeout_ms),
            spectrum: SpectrumConfig {
                fft_size: self.spectrum.fft_size,
                decay: self.spectrum.decay,
                min_db: self.spectrum.min_db,
                max_db: self.spectrum.max_db,
            },
        }
    }

    pub fn visualizer_config(&self) -> VisualizerConfig {
        VisualizerConfig {
            bar_count: self.visualizer.bar_count,
            gain: self.visualizer.gain,
            frame_interval: Duration::from_millis(self.visualizer.frame_interval_ms.max(1)),
        }
    }

    /// Interval between engine ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.playback.position_tick_ms.max(1))
    }
}

/// Errors that can occur with settings
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.controller_config(), ControllerConfig::default());
        assert_eq!(settings.visualizer_config(), VisualizerConfig::default());
        assert_eq!(settings.tick_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.volume = 0.35;
        settings.repeat = true;
        settings.device_name = Some("USB DAC".to_string());
        settings.spectrum.fft_size = 1024;
        settings.save_to_file(&path).unwrap();

        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "volume": 0.5, "spectrum": { "decay": 0.5 } }"#).unwrap();

        let loaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(loaded.volume, 0.5);
        assert_eq!(loaded.spectrum.decay, 0.5);
        assert_eq!(loaded.spectrum.fft_size, 256);
        assert_eq!(loaded.playback, PlaybackSettings::default());
    }

    #[test]
    fn test_invalid_fft_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "spectrum": { "fft_size": 300 } }"#).unwrap();

        assert!(matches!(
            Settings::load_from_file(&path),
            Err(SettingsError::Invalid(_))
        ));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            Settings::load_from_file(&path),
            Err(SettingsError::Parse(_))
        ));
        assert!(matches!(
            Settings::load_from_file(&dir.path().join("missing.json")),
            Err(SettingsError::Io(_))
        ));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SettingsError::Invalid("bad".to_string()).to_string(),
            "Invalid setting: bad"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(SettingsError::Io("gone".to_string()));
        assert_eq!(boxed.to_string(), "IO error: gone");
    }

    #[test]
    fn test_zero_bars_rejected() {
        let mut settings = Settings::default();
        settings.visualizer.bar_count = 0;
        assert!(settings.validate().is_err());
    }
}
