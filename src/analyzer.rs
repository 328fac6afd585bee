//! Vocal range analysis
//!
//! Ties the pipeline together: samples are tracked into per-frame pitches, reduced to a
//! robust range, then named and classified.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{AnalysisConfig, ConfigError},
    note::NoteName,
    pitch_tracker::{PitchTracker, PitchTrackerError},
    range_aggregator::{AggregatedRange, RangeAggregator, RangeError},
    recommend::RecommendationEngine,
    voice::{VoiceCategory, VoiceClassifier},
};

/// Errors surfaced by a full analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Pitch tracking rejected the recording.
    #[error(transparent)]
    Pitch(#[from] PitchTrackerError),

    /// Aggregation found no usable signal.
    #[error(transparent)]
    Range(#[from] RangeError),

    /// The analysis configuration is invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl AnalysisError {
    /// The recording was empty or malformed. Retrying the same input fails again.
    pub fn is_invalid_audio(&self) -> bool {
        matches!(
            self,
            AnalysisError::Pitch(PitchTrackerError::InvalidAudio { .. })
        )
    }

    /// The recording held no usable voiced signal; the singer should record again.
    pub fn is_insufficient_signal(&self) -> bool {
        matches!(
            self,
            AnalysisError::Range(RangeError::InsufficientSignal { .. })
        )
    }
}

/// Outcome of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocalRangeResult {
    /// Lowest reliable pitch in Hz.
    pub lowest_hz: f64,
    /// Highest reliable pitch in Hz.
    pub highest_hz: f64,
    /// Note nearest `lowest_hz`.
    pub lowest_note: NoteName,
    /// Note nearest `highest_hz`.
    pub highest_note: NoteName,
    /// Voice category for the range.
    pub vocal_range_type: VoiceCategory,
    /// Fraction of the recording that carried usable voiced signal, in `[0, 1]`.
    pub confidence_score: f64,
}

impl VocalRangeResult {
    /// Build a result from an already known range, e.g. one loaded from storage.
    ///
    /// Returns `None` unless `0 < lowest_hz <= highest_hz`, both finite, and the confidence
    /// lies in `[0, 1]`.
    pub fn from_range(
        lowest_hz: f64,
        highest_hz: f64,
        confidence_score: f64,
        classifier: &VoiceClassifier,
    ) -> Option<Self> {
        let valid = lowest_hz.is_finite()
            && highest_hz.is_finite()
            && lowest_hz > 0.0
            && lowest_hz <= highest_hz
            && (0.0..=1.0).contains(&confidence_score);
        valid.then(|| VocalRangeResult {
            lowest_hz,
            highest_hz,
            lowest_note: NoteName::from_hz(lowest_hz),
            highest_note: NoteName::from_hz(highest_hz),
            vocal_range_type: classifier.classify(lowest_hz, highest_hz),
            confidence_score,
        })
    }

    fn from_aggregate(range: &AggregatedRange, classifier: &VoiceClassifier) -> Self {
        VocalRangeResult {
            lowest_hz: range.lowest_hz,
            highest_hz: range.highest_hz,
            lowest_note: NoteName::from_hz(range.lowest_hz),
            highest_note: NoteName::from_hz(range.highest_hz),
            vocal_range_type: classifier.classify(range.lowest_hz, range.highest_hz),
            confidence_score: range.confidence_score,
        }
    }

    /// The persisted shape: frequencies and confidence rounded to two decimals.
    pub fn session_record(&self) -> SessionRecord {
        SessionRecord {
            lowest_note_hz: round2(self.lowest_hz),
            highest_note_hz: round2(self.highest_hz),
            lowest_note_name: self.lowest_note.to_string(),
            highest_note_name: self.highest_note.to_string(),
            vocal_range_type: self.vocal_range_type,
            confidence_score: round2(self.confidence_score),
        }
    }
}

/// Session row as stored by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Lowest pitch, two decimals.
    pub lowest_note_hz: f64,
    /// Highest pitch, two decimals.
    pub highest_note_hz: f64,
    /// e.g. `"F3"`.
    pub lowest_note_name: String,
    /// e.g. `"D5"`.
    pub highest_note_name: String,
    /// One of the six band names.
    pub vocal_range_type: VoiceCategory,
    /// Two decimals.
    pub confidence_score: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Runs the whole pipeline for one recording at a time. Immutable and shareable.
#[derive(Debug)]
pub struct VocalRangeAnalyzer {
    config: AnalysisConfig,
    tracker: PitchTracker,
    classifier: VoiceClassifier,
}

impl VocalRangeAnalyzer {
    /// Validate `config` and prepare every stage.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let tracker = PitchTracker::new(config.pitch.clone())?;
        let classifier = VoiceClassifier::new(config.voice_bands.clone())?;
        Ok(VocalRangeAnalyzer {
            config,
            tracker,
            classifier,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The classifier built from the configured band table.
    pub fn classifier(&self) -> &VoiceClassifier {
        &self.classifier
    }

    /// An engine using the configured recommendation parameters.
    pub fn recommendation_engine(&self) -> RecommendationEngine {
        RecommendationEngine::new(self.config.recommendation.clone())
    }

    /// Analyse mono samples recorded at the configured sample rate.
    pub fn analyze(&self, samples: &[f32]) -> Result<VocalRangeResult, AnalysisError> {
        self.analyze_at(samples, self.config.sample_rate)
    }

    /// Analyse mono samples recorded at `sample_rate`.
    ///
    /// Fails with an invalid-audio error for empty input or a non-positive rate, and with
    /// an insufficient-signal error when no frame carries usable pitch.
    pub fn analyze_at(
        &self,
        samples: &[f32],
        sample_rate: f32,
    ) -> Result<VocalRangeResult, AnalysisError> {
        let range_config = self.config.range.clone();
        let range = if self.config.parallel_pitch {
            let frames = self.tracker.track_parallel(samples, sample_rate)?;
            RangeAggregator::aggregate(range_config, frames)?
        } else {
            RangeAggregator::aggregate(range_config, self.tracker.track(samples, sample_rate)?)?
        };

        let result = VocalRangeResult::from_aggregate(&range, &self.classifier);
        log::debug!(
            "vocal range {}-{} ({}), confidence {:.2}",
            result.lowest_note,
            result.highest_note,
            result.vocal_range_type,
            result.confidence_score
        );
        Ok(result)
    }
}
