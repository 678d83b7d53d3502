//! Configuration management for mp3cast
//! Handles saving/loading encoder defaults used by the command line tool

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::convert::DEFAULT_CHUNK_FRAMES;
use crate::encoder::{BitrateMode, DEFAULT_QUALITY};
use crate::error::Result;
use crate::tags::Id3Tags;

/// Encoder defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LAME quality, 0 (best) to 9 (fastest)
    pub quality: u8,
    /// Constant bitrate in kbps; VBR when unset
    pub cbr_kbps: Option<u32>,
    /// Output sample rate; follows the input when unset
    pub output_sample_rate: Option<u32>,
    /// Frames read per chunk in file conversions
    pub chunk_frames: usize,
    /// Tags written into every output
    pub tags: Option<Id3Tags>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            cbr_kbps: None,
            output_sample_rate: None,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            tags: None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "mp3cast", "Mp3Cast").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Load configuration from the default location, or defaults if not there
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => {
                        log::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => log::warn!("Ignoring unreadable config {:?}: {}", path, e),
                }
            }
        }
        log::info!("Using default configuration");
        Self::default()
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::config_path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content =
            serde_json::to_string_pretty(self).map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;
        fs::write(path, content)?;
        log::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn bitrate(&self) -> BitrateMode {
        match self.cbr_kbps {
            Some(kbps) => BitrateMode::Cbr(kbps),
            None => BitrateMode::Vbr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let config = Config {
            quality: 2,
            cbr_kbps: Some(192),
            output_sample_rate: Some(48000),
            chunk_frames: 4096,
            tags: Some(Id3Tags {
                artist: "me".into(),
                ..Default::default()
            }),
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
        assert_eq!(config.bitrate(), BitrateMode::Cbr(192));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "quality": 7 }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.quality, 7);
        assert_eq!(config.chunk_frames, DEFAULT_CHUNK_FRAMES);
        assert_eq!(config.bitrate(), BitrateMode::Vbr);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
