//! Configuration
//!
//! Every tunable of the analysis pipeline lives in an explicit, immutable [`AnalysisConfig`]
//! handed to each component at construction. Nothing is read from process-wide state.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::voice::{default_bands, VoiceBand};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its domain.
    #[error("invalid configuration `{field}`: {msg}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        msg: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, msg: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            msg: msg.into(),
        }
    }
}

fn require_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be finite and > 0, got {value}")))
    }
}

fn require_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1], got {value}")))
    }
}

/// Per-frame pitch estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Analysis frame length in samples.
    pub frame_length: usize,
    /// Advance between consecutive frames in samples.
    pub hop_length: usize,
    /// Frames whose RMS amplitude falls below this are unvoiced.
    pub amplitude_threshold: f32,
    /// Lowest fundamental searched for, in Hz.
    pub min_frequency_hz: f32,
    /// Highest fundamental searched for, in Hz.
    pub max_frequency_hz: f32,
    /// Peaks whose adjusted strengths differ by no more than this are octave-ambiguous.
    pub octave_margin: f32,
    /// Strength subtracted per octave of lag above the shortest searched lag.
    pub octave_cost: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        PitchConfig {
            frame_length: 768,
            hop_length: 384,
            amplitude_threshold: 0.02,
            min_frequency_hz: 60.0,
            max_frequency_hz: 1600.0,
            octave_margin: 0.02,
            octave_cost: 0.04,
        }
    }
}

impl PitchConfig {
    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_length < 4 {
            return Err(ConfigError::invalid("frame_length", "must be at least 4 samples"));
        }
        if self.hop_length == 0 {
            return Err(ConfigError::invalid("hop_length", "cannot be zero"));
        }
        if !(self.amplitude_threshold.is_finite() && self.amplitude_threshold >= 0.0) {
            return Err(ConfigError::invalid(
                "amplitude_threshold",
                format!("must be finite and >= 0, got {}", self.amplitude_threshold),
            ));
        }
        require_positive("min_frequency_hz", self.min_frequency_hz as f64)?;
        require_positive("max_frequency_hz", self.max_frequency_hz as f64)?;
        if self.min_frequency_hz >= self.max_frequency_hz {
            return Err(ConfigError::invalid(
                "min_frequency_hz",
                "must be below max_frequency_hz",
            ));
        }
        require_unit("octave_margin", self.octave_margin as f64)?;
        require_unit("octave_cost", self.octave_cost as f64)?;
        Ok(())
    }
}

/// Range aggregation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Frames with confidence below this are discarded.
    pub confidence_min_threshold: f32,
    /// Number of recently accepted pitches used as the outlier reference.
    pub outlier_window: usize,
    /// A pitch deviating from the window median by more than this many spreads is an outlier.
    pub outlier_spread_multiplier: f64,
    /// Floor on the window spread, in semitones.
    pub min_spread_semitones: f64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        RangeConfig {
            confidence_min_threshold: 0.3,
            outlier_window: 7,
            outlier_spread_multiplier: 4.0,
            min_spread_semitones: 1.0,
        }
    }
}

impl RangeConfig {
    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_unit("confidence_min_threshold", self.confidence_min_threshold as f64)?;
        if self.outlier_window == 0 {
            return Err(ConfigError::invalid("outlier_window", "cannot be zero"));
        }
        require_positive("outlier_spread_multiplier", self.outlier_spread_multiplier)?;
        require_positive("min_spread_semitones", self.min_spread_semitones)?;
        Ok(())
    }
}

/// Recommendation parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    /// Keep only the best `top_k` songs. `None` returns the full ranking.
    pub top_k: Option<usize>,
}

/// Complete configuration of the analysis pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sample rate of the decoded recording, in Hz.
    pub sample_rate: f32,
    /// Estimate frame candidates on the rayon pool instead of lazily.
    pub parallel_pitch: bool,
    /// Pitch tracker parameters.
    pub pitch: PitchConfig,
    /// Range aggregator parameters.
    pub range: RangeConfig,
    /// Voice category band table, in increasing center frequency.
    pub voice_bands: Vec<VoiceBand>,
    /// Recommendation parameters.
    pub recommendation: RecommendationConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            sample_rate: 22_050.0,
            parallel_pitch: false,
            pitch: PitchConfig::default(),
            range: RangeConfig::default(),
            voice_bands: default_bands(),
            recommendation: RecommendationConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check every field, including the band table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("sample_rate", self.sample_rate as f64)?;
        self.pitch.validate()?;
        self.range.validate()?;
        crate::voice::validate_bands(&self.voice_bands)?;
        if self.recommendation.top_k == Some(0) {
            return Err(ConfigError::invalid("top_k", "must be >= 1 when set"));
        }
        Ok(())
    }
}
