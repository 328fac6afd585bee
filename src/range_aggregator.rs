//! Range Aggregator
//!
//! Single forward pass over per-frame pitch estimates that keeps a running minimum and
//! maximum while rejecting isolated octave jumps. Memory is bounded by the outlier window.

use std::collections::VecDeque;

use thiserror::Error;

use crate::{
    config::{ConfigError, RangeConfig},
    pitch_tracker::PitchSample,
};

const SEMITONES_PER_OCTAVE: f64 = 12.0;

/// Errors returned by the range aggregator.
#[derive(Debug, Error)]
pub enum RangeError {
    /// No frame survived confidence gating and outlier rejection.
    #[error("insufficient voiced signal: no usable pitch in {total_frames} frames")]
    InsufficientSignal {
        /// Number of frames that were examined.
        total_frames: usize,
    },

    /// The aggregator configuration is invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

/// Robust range of a recording.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AggregatedRange {
    /// Lowest accepted frequency in Hz.
    pub lowest_hz: f64,
    /// Highest accepted frequency in Hz.
    pub highest_hz: f64,
    /// Fraction of frames that passed the confidence gate, in `[0, 1]`.
    pub confidence_score: f64,
    /// Frames that passed the confidence gate, outliers included.
    pub voiced_frames: usize,
    /// Frames that contributed to the range.
    pub retained_frames: usize,
    /// All frames seen.
    pub total_frames: usize,
    /// Frames that passed the confidence gate but were rejected as octave jumps.
    pub rejected_outliers: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Streaming reducer from [`PitchSample`]s to an [`AggregatedRange`].
///
/// Pitches are compared in semitones. A pitch further from the window median than
/// `outlier_spread_multiplier` times the window spread (median absolute deviation,
/// floored at `min_spread_semitones`) is held back; it is accepted only if the very next
/// frame is a usable outlier in the same direction.
///
/// Outlier rejection only guards the range endpoints. Every frame that passes the
/// confidence gate counts towards the confidence score.
#[derive(Debug, Clone)]
pub struct RangeAggregator {
    config: RangeConfig,
    window: VecDeque<f64>,
    pending: Option<(f64, Direction)>,
    lowest: f64,
    highest: f64,
    voiced: usize,
    retained: usize,
    total: usize,
    rejected: usize,
}

impl RangeAggregator {
    /// Create an empty aggregator.
    pub fn new(config: RangeConfig) -> Result<Self, RangeError> {
        config.validate()?;
        Ok(RangeAggregator {
            window: VecDeque::with_capacity(config.outlier_window),
            config,
            pending: None,
            lowest: f64::INFINITY,
            highest: f64::NEG_INFINITY,
            voiced: 0,
            retained: 0,
            total: 0,
            rejected: 0,
        })
    }

    /// Reduce a whole sequence in one call.
    pub fn aggregate<I>(config: RangeConfig, samples: I) -> Result<AggregatedRange, RangeError>
    where
        I: IntoIterator<Item = PitchSample>,
    {
        let mut aggregator = RangeAggregator::new(config)?;
        for sample in samples {
            aggregator.push(sample);
        }
        aggregator.finish()
    }

    /// Feed the next frame, in frame order.
    pub fn push(&mut self, sample: PitchSample) {
        self.total += 1;
        let hz = sample
            .frequency_hz
            .map(f64::from)
            .filter(|hz| hz.is_finite() && *hz > 0.0);
        let Some(hz) = hz.filter(|_| sample.confidence >= self.config.confidence_min_threshold)
        else {
            // Corroboration must come from the very next frame.
            self.drop_pending();
            return;
        };
        self.voiced += 1;
        let pitch = SEMITONES_PER_OCTAVE * hz.log2();

        let Some(center) = median(self.window.iter().copied()) else {
            self.accept(pitch);
            return;
        };
        let spread = median_absolute_deviation(&self.window, center)
            .max(self.config.min_spread_semitones);
        let deviation = pitch - center;

        if deviation.abs() <= self.config.outlier_spread_multiplier * spread {
            self.drop_pending();
            self.accept(pitch);
            return;
        }

        let direction = if deviation > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        };
        match self.pending.take() {
            Some((held, held_direction)) if held_direction == direction => {
                log::trace!(
                    "frame {}: corroborated jump {:+.1} semitones",
                    sample.frame_index,
                    deviation
                );
                self.accept(held);
                self.accept(pitch);
            }
            previous => {
                if previous.is_some() {
                    self.rejected += 1;
                }
                self.pending = Some((pitch, direction));
            }
        }
    }

    /// Close the pass. An uncorroborated trailing outlier is dropped.
    ///
    /// Returns `Err(InsufficientSignal)` if nothing was retained.
    pub fn finish(mut self) -> Result<AggregatedRange, RangeError> {
        self.drop_pending();
        if self.retained == 0 {
            log::debug!("no usable pitch in {} frames", self.total);
            return Err(RangeError::InsufficientSignal {
                total_frames: self.total,
            });
        }

        let to_hz = |semitones: f64| 2f64.powf(semitones / SEMITONES_PER_OCTAVE);
        let range = AggregatedRange {
            lowest_hz: to_hz(self.lowest),
            highest_hz: to_hz(self.highest),
            confidence_score: (self.voiced as f64 / self.total as f64).clamp(0.0, 1.0),
            voiced_frames: self.voiced,
            retained_frames: self.retained,
            total_frames: self.total,
            rejected_outliers: self.rejected,
        };
        log::debug!(
            "range {:.2}-{:.2} Hz from {}/{} frames ({} outliers rejected)",
            range.lowest_hz,
            range.highest_hz,
            range.retained_frames,
            range.total_frames,
            range.rejected_outliers
        );
        Ok(range)
    }

    fn drop_pending(&mut self) {
        if self.pending.take().is_some() {
            self.rejected += 1;
        }
    }

    fn accept(&mut self, pitch: f64) {
        self.lowest = self.lowest.min(pitch);
        self.highest = self.highest.max(pitch);
        self.retained += 1;
        if self.window.len() == self.config.outlier_window {
            self.window.pop_front();
        }
        self.window.push_back(pitch);
    }
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn median_absolute_deviation(window: &VecDeque<f64>, center: f64) -> f64 {
    median(window.iter().map(|v| (v - center).abs())).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voiced(frame_index: usize, hz: f32) -> PitchSample {
        PitchSample {
            frequency_hz: Some(hz),
            confidence: 0.9,
            frame_index,
        }
    }

    fn run(hz: &[f32]) -> AggregatedRange {
        let samples = hz.iter().enumerate().map(|(i, &f)| voiced(i, f));
        RangeAggregator::aggregate(RangeConfig::default(), samples).unwrap()
    }

    #[test]
    fn isolated_octave_jump_is_rejected() {
        let range = run(&[220.0, 221.0, 219.0, 440.0, 220.0, 222.0]);
        assert!(range.highest_hz < 230.0, "{range:?}");
        assert_eq!(range.rejected_outliers, 1);
        assert_eq!(range.retained_frames, 5);
        assert_eq!(range.voiced_frames, 6);
        assert_eq!(range.confidence_score, 1.0);
    }

    #[test]
    fn corroborated_jump_extends_range() {
        let range = run(&[220.0, 221.0, 219.0, 440.0, 441.0, 220.0]);
        assert!((range.highest_hz - 441.0).abs() < 0.01, "{range:?}");
        assert_eq!(range.rejected_outliers, 0);
    }

    #[test]
    fn opposite_outliers_do_not_corroborate() {
        let range = run(&[220.0, 221.0, 219.0, 440.0, 110.0, 220.0]);
        assert!(range.lowest_hz > 200.0 && range.highest_hz < 230.0, "{range:?}");
        assert_eq!(range.rejected_outliers, 2);
    }

    #[test]
    fn gap_between_outliers_breaks_corroboration() {
        let mut samples: Vec<PitchSample> = [220.0, 221.0, 219.0, 440.0]
            .iter()
            .enumerate()
            .map(|(i, &f)| voiced(i, f))
            .collect();
        samples.push(PitchSample {
            frequency_hz: None,
            confidence: 0.0,
            frame_index: 4,
        });
        samples.push(voiced(5, 441.0));
        samples.push(voiced(6, 220.0));

        let range = RangeAggregator::aggregate(RangeConfig::default(), samples).unwrap();
        assert!(range.highest_hz < 230.0, "{range:?}");
        assert_eq!(range.rejected_outliers, 2);
        assert_eq!(range.total_frames, 7);
    }

    #[test]
    fn trailing_outlier_is_dropped() {
        let range = run(&[220.0, 221.0, 219.0, 880.0]);
        assert!(range.highest_hz < 230.0);
        assert_eq!(range.rejected_outliers, 1);
    }

    #[test]
    fn stepwise_scale_is_followed() {
        let scale = [196.0, 220.0, 246.9, 261.6, 293.7, 329.6, 349.2, 392.0];
        let range = run(&scale);
        assert!((range.lowest_hz - 196.0).abs() < 0.01);
        assert!((range.highest_hz - 392.0).abs() < 0.01);
    }
}
