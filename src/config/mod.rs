//! Configuration management
//!
//! Settings resolve as defaults, then the TOML file, then environment
//! variables, then command-line overrides.

pub mod file;

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::session::SessionConfig;
use crate::voice::analyzer::{DEFAULT_BLOCK_SIZE, DEFAULT_HANDOFF_CAPACITY, DEFAULT_SILENCE_THRESHOLD};
use crate::voice::{DEFAULT_SAMPLE_RATE, EnergyMeasure, SilenceCutoffPolicy};
use crate::{Error, Result};

/// Default peer endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/interview";

/// Turntalk configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// WebSocket endpoint of the voice peer
    pub endpoint: String,
    pub voice: VoiceConfig,
}

/// Capture and segmentation configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceConfig {
    /// Capture rate, also written into every utterance container
    pub sample_rate: u32,
    /// Samples per analysis block
    pub block_size: usize,
    pub silence_threshold: f32,
    pub energy_measure: EnergyMeasure,
    pub cutoff: SilenceCutoffPolicy,
    pub handoff_capacity: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            energy_measure: EnergyMeasure::default(),
            cutoff: SilenceCutoffPolicy::default(),
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            voice: VoiceConfig::default(),
        }
    }
}

/// Command-line overrides, applied last
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub sample_rate: Option<u32>,
    pub block_size: Option<usize>,
    pub silence_threshold: Option<f32>,
    pub energy_measure: Option<EnergyMeasure>,
    pub cutoff: Option<SilenceCutoffPolicy>,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// `path` replaces the standard config file location when given.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Layer a parsed config file and an environment lookup over the defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value
    pub fn resolve(
        fc: file::TurntalkConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = VoiceConfig::default();

        // Cutoff (env > toml > default); one env form at a time
        let env_frames = parse_env::<u32>(&env, "TURNTALK_SILENCE_FRAMES")?;
        let env_millis = parse_env::<u64>(&env, "TURNTALK_SILENCE_MS")?;
        let env_cutoff = match (env_frames, env_millis) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "set only one of TURNTALK_SILENCE_FRAMES and TURNTALK_SILENCE_MS".to_string(),
                ));
            }
            (Some(frames), None) => Some(SilenceCutoffPolicy::FrameCount(frames)),
            (None, Some(millis)) => Some(SilenceCutoffPolicy::Duration(Duration::from_millis(
                millis,
            ))),
            (None, None) => None,
        };

        let voice = VoiceConfig {
            sample_rate: parse_env(&env, "TURNTALK_SAMPLE_RATE")?
                .or(fc.voice.sample_rate)
                .unwrap_or(defaults.sample_rate),
            block_size: parse_env(&env, "TURNTALK_BLOCK_SIZE")?
                .or(fc.voice.block_size)
                .unwrap_or(defaults.block_size),
            silence_threshold: parse_env(&env, "TURNTALK_SILENCE_THRESHOLD")?
                .or(fc.voice.silence_threshold)
                .unwrap_or(defaults.silence_threshold),
            energy_measure: parse_env(&env, "TURNTALK_ENERGY_MEASURE")?
                .or(fc.voice.energy_measure)
                .unwrap_or(defaults.energy_measure),
            cutoff: env_cutoff
                .or(fc.voice.cutoff)
                .unwrap_or(defaults.cutoff),
            handoff_capacity: fc.voice.handoff_capacity.unwrap_or(defaults.handoff_capacity),
        };

        let endpoint = env("TURNTALK_URL")
            .or(fc.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        Ok(Self { endpoint, voice })
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(endpoint) = overrides.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(rate) = overrides.sample_rate {
            self.voice.sample_rate = rate;
        }
        if let Some(size) = overrides.block_size {
            self.voice.block_size = size;
        }
        if let Some(threshold) = overrides.silence_threshold {
            self.voice.silence_threshold = threshold;
        }
        if let Some(measure) = overrides.energy_measure {
            self.voice.energy_measure = measure;
        }
        if let Some(cutoff) = overrides.cutoff {
            self.voice.cutoff = cutoff;
        }
    }

    /// Reject settings the session cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "endpoint must be a ws:// or wss:// URL, got {}",
                self.endpoint
            )));
        }

        let voice = &self.voice;
        if voice.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if voice.block_size == 0 {
            return Err(Error::Config("block size must be positive".to_string()));
        }
        if !voice.silence_threshold.is_finite() || voice.silence_threshold < 0.0 {
            return Err(Error::Config(format!(
                "silence threshold must be a non-negative number, got {}",
                voice.silence_threshold
            )));
        }
        match voice.cutoff {
            SilenceCutoffPolicy::FrameCount(0) => {
                return Err(Error::Config("silence cutoff must be at least one block".to_string()));
            }
            SilenceCutoffPolicy::Duration(d) if d.is_zero() => {
                return Err(Error::Config("silence cutoff must be longer than zero".to_string()));
            }
            _ => {}
        }
        if voice.handoff_capacity == 0 {
            return Err(Error::Config("handoff capacity must be positive".to_string()));
        }

        Ok(())
    }

    /// Session tuning derived from the voice settings
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            silence_threshold: self.voice.silence_threshold,
            energy_measure: self.voice.energy_measure,
            cutoff: self.voice.cutoff,
            handoff_capacity: self.voice.handoff_capacity,
        }
    }
}

fn parse_env<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {key}={raw}: {e}")))
        })
        .transpose()
}
