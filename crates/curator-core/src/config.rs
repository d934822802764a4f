use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CuratorError, Result};

/// Top-level configuration for Curator.
///
/// Loaded from `~/.curator/config.toml` by default. Sections are passed
/// explicitly to the components that need them; nothing reads configuration
/// from process-wide state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CuratorConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub derivatives: DerivativeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CuratorConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CuratorConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CuratorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory for the database and working files.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.curator/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Ingest pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Queue lane that carries ingest and characterize jobs.
    pub queue_name: String,
    /// Staging area for uploads and re-materialized binaries.
    pub working_path: PathBuf,
    /// Whether audio and video derivatives (transcodes) are generated.
    pub enable_transcode: bool,
    /// Deliveries of a failing job before it is dropped.
    pub max_attempts: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_name: "ingest".to_string(),
            working_path: PathBuf::from("~/.curator/working"),
            enable_transcode: false,
            max_attempts: 3,
        }
    }
}

/// Derivative recipe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeConfig {
    /// Longest edge of generated thumbnails, in pixels.
    pub thumbnail_size: u32,
    /// ImageMagick executable used for thumbnails.
    pub convert_program: String,
    /// ffmpeg executable used for audio and video transcodes.
    pub ffmpeg_program: String,
}

impl Default for DerivativeConfig {
    fn default() -> Self {
        Self {
            thumbnail_size: 338,
            convert_program: "convert".to_string(),
            ffmpeg_program: "ffmpeg".to_string(),
        }
    }
}

/// Repository database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding file sets, binaries, versions and the index.
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("~/.curator/data/curator.db"),
        }
    }
}
