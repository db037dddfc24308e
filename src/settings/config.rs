//! Host configuration
//!
//! Loaded once at startup from `<config_dir>/screen-recorder/config.json`,
//! then overridden from the environment.

use super::store::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name used under the platform config/data directories
pub const APP_DIR_NAME: &str = "screen-recorder";

/// How a finished recording is handed to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Save directly into the output directory
    #[default]
    Save,
    /// Keep the recording in a review surface until the user saves it
    Review,
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "save" => Ok(Self::Save),
            "review" => Ok(Self::Review),
            other => Err(format!("unknown delivery mode: {}", other)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// ffmpeg binary used for capture, compositing and conversion
    pub ffmpeg_path: PathBuf,

    /// ffprobe binary used to read recording metadata
    pub ffprobe_path: PathBuf,

    /// Where saved recordings land (the user's downloads directory by default)
    pub output_dir: PathBuf,

    /// Where recordings waiting for review are kept
    pub review_dir: PathBuf,

    /// Delivery mode for finished recordings
    pub delivery: DeliveryMode,

    /// Capture and output frame rate
    pub frame_rate: u32,

    /// Target encoder bitrate in bits per second
    pub video_bits_per_second: u32,

    /// Bound on waiting for a source or stream to become ready
    pub ready_timeout_ms: u64,

    /// Bound on waiting for the encoder's final chunks after stop
    pub final_chunk_timeout_ms: u64,

    /// Bound on waiting for a flush acknowledgment
    pub flush_ack_timeout_ms: u64,

    /// Bound on a whole format conversion
    pub conversion_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let output_dir = dirs::download_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir);
        let review_dir = std::env::temp_dir().join(APP_DIR_NAME).join("review");

        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            output_dir,
            review_dir,
            delivery: DeliveryMode::Save,
            frame_rate: 30,
            video_bits_per_second: 2_500_000,
            ready_timeout_ms: 5_000,
            final_chunk_timeout_ms: 3_000,
            flush_ack_timeout_ms: 500,
            conversion_timeout_secs: 120,
        }
    }
}

impl AppConfig {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.json"))
    }

    /// Load configuration from `path` (missing file means defaults)
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from the default location and apply environment overrides
    pub fn load() -> Result<Self, SettingsError> {
        let mut config = match Self::default_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `SCREEN_RECORDER_*` overrides through the given lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("SCREEN_RECORDER_FFMPEG") {
            self.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCREEN_RECORDER_FFPROBE") {
            self.ffprobe_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCREEN_RECORDER_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(path);
        }
        if let Some(mode) = lookup("SCREEN_RECORDER_DELIVERY") {
            match mode.parse() {
                Ok(mode) => self.delivery = mode,
                Err(e) => tracing::warn!("Ignoring SCREEN_RECORDER_DELIVERY: {}", e),
            }
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn final_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.final_chunk_timeout_ms)
    }

    pub fn flush_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_ack_timeout_ms)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}
