//! TOML configuration file loading
//!
//! Supports `~/.config/turntalk/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::voice::{EnergyMeasure, SilenceCutoffPolicy};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TurntalkConfigFile {
    /// Peer endpoint (e.g. "ws://localhost:8000/ws/interview")
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Capture and segmentation settings
    #[serde(default)]
    pub voice: VoiceFileConfig,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Samples per analysis block
    pub block_size: Option<usize>,

    pub silence_threshold: Option<f32>,

    /// "rms" or "peak"
    pub energy_measure: Option<EnergyMeasure>,

    /// `{ frames = 15 }` or `{ millis = 1000 }`
    pub cutoff: Option<SilenceCutoffPolicy>,

    pub handoff_capacity: Option<usize>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns an error if the contents are not valid TOML for the schema
pub fn parse_config_file(content: &str) -> crate::Result<TurntalkConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from `path`, or from the standard path
///
/// Returns `TurntalkConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(path: Option<&Path>) -> TurntalkConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return TurntalkConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return TurntalkConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TurntalkConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TurntalkConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/turntalk/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("turntalk").join("config.toml"))
}
