//! Configuration management.
//!
//! Loads and saves recorder configuration to the platform-standard
//! config directory:
//! - Linux: `~/.config/screenclips/config.json`
//! - macOS: `~/Library/Application Support/screenclips/config.json`
//! - Windows: `%APPDATA%\screenclips\config.json`
//!
//! Loading is forgiving: a missing or unparsable file yields defaults,
//! and unknown fields are ignored so older builds can read newer files.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};

/// Default clips directory name under the user's home.
const DEFAULT_CLIPS_DIR: &str = "ScreenClips";

fn default_buffer_seconds() -> u32 {
    30
}

fn default_fps() -> u32 {
    30
}

fn default_audio_enabled() -> bool {
    true
}

/// Audio capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Whether audio is captured at all.
    #[serde(default = "default_audio_enabled")]
    pub enabled: bool,
    /// Microphone device name. None picks the first available microphone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microphone: Option<String>,
    /// Desktop loopback/monitor device name. None picks the first match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loopback: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            microphone: None,
            loopback: None,
        }
    }
}

/// Recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// How many trailing seconds the ring buffer retains.
    #[serde(default = "default_buffer_seconds")]
    pub buffer_seconds: u32,
    /// Capture rate in frames per second.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Clips directory override. None means `~/ScreenClips`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clips_dir: Option<String>,
    /// Audio settings group.
    #[serde(default)]
    pub audio: AudioConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_seconds: default_buffer_seconds(),
            fps: default_fps(),
            clips_dir: None,
            audio: AudioConfig::default(),
        }
    }
}

impl RecorderConfig {
    /// Frame capacity of the ring buffer: `buffer_seconds * fps`.
    pub fn frame_capacity(&self) -> usize {
        self.buffer_seconds.max(1) as usize * self.fps.max(1) as usize
    }

    /// Capture interval derived from fps.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    /// Audio chunk ring capacity. Sized for a 20 ms nominal callback
    /// chunk so a full ring always spans at least `buffer_seconds`.
    pub fn audio_chunk_capacity(&self) -> usize {
        self.buffer_seconds.max(1) as usize * 50
    }

    /// Resolve the clips directory, creating it if necessary.
    pub fn clips_dir(&self) -> std::io::Result<PathBuf> {
        let dir = match &self.clips_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => default_clips_dir().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "could not determine home directory",
                )
            })?,
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn default_clips_dir() -> Option<PathBuf> {
    UserDirs::new().map(|dirs| dirs.home_dir().join(DEFAULT_CLIPS_DIR))
}

fn config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "screenclips").map(|dirs| dirs.config_dir().join("config.json"))
}

/// Load configuration from disk. Any failure falls back to defaults.
pub fn load_config() -> RecorderConfig {
    let Some(path) = config_path() else {
        tracing::warn!("could not determine config directory, using defaults");
        return RecorderConfig::default();
    };

    if !path.exists() {
        tracing::debug!("no config file, using defaults");
        return RecorderConfig::default();
    }

    match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<RecorderConfig>(&contents) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse config, using defaults");
                RecorderConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "failed to read config, using defaults");
            RecorderConfig::default()
        }
    }
}

/// Save configuration to disk, creating the config directory first.
pub fn save_config(config: &RecorderConfig) -> std::io::Result<()> {
    let path = config_path().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not determine config directory",
        )
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(&path, json)?;
    tracing::info!(path = %path.display(), "saved configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.buffer_seconds, 30);
        assert_eq!(config.fps, 30);
        assert!(config.clips_dir.is_none());
        assert!(config.audio.enabled);
        assert!(config.audio.microphone.is_none());
        assert!(config.audio.loopback.is_none());
    }

    #[test]
    fn derived_capacities() {
        let config = RecorderConfig::default();
        assert_eq!(config.frame_capacity(), 900);
        assert_eq!(config.audio_chunk_capacity(), 1500);
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn zero_values_clamp_instead_of_panic() {
        let config = RecorderConfig {
            buffer_seconds: 0,
            fps: 0,
            ..Default::default()
        };
        assert_eq!(config.frame_capacity(), 1);
        assert!(config.frame_interval() > Duration::ZERO);
    }

    #[test]
    fn serialization_roundtrip() {
        let mut config = RecorderConfig::default();
        config.buffer_seconds = 60;
        config.clips_dir = Some("/custom/clips".to_string());
        config.audio.microphone = Some("USB Headset".to_string());

        let json = serde_json::to_string(&config).unwrap();
        let parsed: RecorderConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.buffer_seconds, 60);
        assert_eq!(parsed.clips_dir, Some("/custom/clips".to_string()));
        assert_eq!(parsed.audio.microphone, Some("USB Headset".to_string()));
    }

    #[test]
    fn none_fields_are_not_serialized() {
        let config = RecorderConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("clips_dir"));
        assert!(!json.contains("microphone"));
        assert!(!json.contains("loopback"));
    }

    #[test]
    fn backward_compatible_partial_config() {
        // Older file with only some fields present
        let json = r#"{"buffer_seconds": 45}"#;
        let parsed: RecorderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.buffer_seconds, 45);
        assert_eq!(parsed.fps, 30);
        assert!(parsed.audio.enabled);
    }

    #[test]
    fn audio_config_backward_compatible() {
        let json = r#"{"enabled": false}"#;
        let parsed: AudioConfig = serde_json::from_str(json).unwrap();
        assert!(!parsed.enabled);
        assert!(parsed.microphone.is_none());
    }

    #[test]
    fn explicit_clips_dir_wins() {
        let unique = std::env::temp_dir().join(format!(
            "screenclips_config_test_{}",
            std::process::id()
        ));
        let config = RecorderConfig {
            clips_dir: Some(unique.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let resolved = config.clips_dir().unwrap();
        assert_eq!(resolved, unique);
        assert!(resolved.exists());
        fs::remove_dir_all(unique).unwrap();
    }
}
