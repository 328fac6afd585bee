//! # vocal_range
//!
//! Derive a singer's range from a short recording and rank songs that fit it.
//!
//! ## Example
//! ```rust
//! use vocal_range::{AnalysisConfig, VocalRangeAnalyzer};
//!
//! fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalysisConfig::default();
//!     let sample_rate = config.sample_rate;
//!
//!     // 1) Build the analysis pipeline
//!     let analyzer = VocalRangeAnalyzer::new(config)?;
//!
//!     // 2) Feed it a decoded mono recording (here: one second of A3)
//!     let samples: Vec<f32> = (0..sample_rate as usize)
//!         .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate).sin())
//!         .collect();
//!     let range = analyzer.analyze(&samples)?;
//!     println!(
//!         "{} to {} ({}), confidence {:.2}",
//!         range.lowest_note, range.highest_note, range.vocal_range_type, range.confidence_score
//!     );
//!
//!     // 3) Rank a catalog against it
//!     let engine = analyzer.recommendation_engine();
//!     for rec in engine.recommend(&range, &[]) {
//!         println!("{} {:.2} {:+}", rec.song_id, rec.compatibility_score, rec.key_adjustment);
//!     }
//!
//!     Ok(())
//! }
//! # run().unwrap();
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

/// End-to-end analysis pipeline.
pub use analyzer::{AnalysisError, SessionRecord, VocalRangeAnalyzer, VocalRangeResult};

/// Configuration objects.
pub use config::{AnalysisConfig, ConfigError, PitchConfig, RangeConfig, RecommendationConfig};

/// Note naming.
pub use note::{semitone_offset, semitone_to_hz, NoteName, NoteParseError, PitchClass};

/// Per-frame pitch estimation.
pub use pitch_tracker::{
    PitchFrames, PitchSample, PitchTracker, PitchTrackerBuilder, PitchTrackerError,
};

/// Streaming range reduction.
pub use range_aggregator::{AggregatedRange, RangeAggregator, RangeError};

/// Song ranking.
pub use recommend::{
    best_key_adjustment, compatibility_score, out_of_range_penalty, Recommendation,
    RecommendationEngine, RecommendationEngineBuilder, Song, SongRecommendation,
};

/// Voice categories.
pub use voice::{default_bands, VoiceBand, VoiceCategory, VoiceClassifier};

/// Full analysis pipeline.
pub mod analyzer;

/// Configuration and TOML loading.
pub mod config;

/// Frequency to note mapping.
pub mod note;

/// Pitch tracking module.
pub mod pitch_tracker;

/// Range aggregation module.
pub mod range_aggregator;

/// Recommendation module.
pub mod recommend;

/// Voice classification module.
pub mod voice;
