//! Pitch Tracker
//!
//! Frame-by-frame fundamental frequency estimation for recorded voice.
//!
//! Each frame is scored with a normalized square difference function (McLeod & Wyvill, 2005)
//! built from an FFT autocorrelation. Peak strengths are biased towards shorter lags by a
//! per-octave cost (as in Boersma's autocorrelation tracker) before the octave ambiguity
//! check, which falls back on temporal continuity and then on the lower frequency.

use std::{iter::FusedIterator, sync::Arc};

use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, PitchConfig};

/// Partner peaks must sit within this fraction of the expected lag.
const PARTNER_LAG_TOLERANCE: f32 = 0.04;

/// Errors returned by the pitch tracker.
#[derive(Debug, Error)]
pub enum PitchTrackerError {
    /// The recording or its sample rate cannot be analysed.
    #[error("invalid audio: {reason}")]
    InvalidAudio {
        /// Why the input was rejected.
        reason: String,
    },

    /// The tracker configuration is invalid.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl PitchTrackerError {
    fn invalid_audio(reason: impl Into<String>) -> Self {
        PitchTrackerError::InvalidAudio {
            reason: reason.into(),
        }
    }
}

/// Pitch estimate for one analysis frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchSample {
    /// Estimated fundamental, absent for unvoiced frames.
    pub frequency_hz: Option<f32>,
    /// Reliability of the estimate in `[0, 1]`; zero for unvoiced frames.
    pub confidence: f32,
    /// Position of the frame in the recording.
    pub frame_index: usize,
}

impl PitchSample {
    fn unvoiced(frame_index: usize) -> Self {
        PitchSample {
            frequency_hz: None,
            confidence: 0.0,
            frame_index,
        }
    }
}

/// Builder for a [`PitchTracker`].
#[derive(Debug, Clone, Default)]
pub struct PitchTrackerBuilder {
    config: PitchConfig,
}

impl PitchTrackerBuilder {
    /// Start with the default [`PitchConfig`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every parameter at once.
    pub fn config(mut self, config: PitchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the analysis frame length in samples.
    pub fn frame_length(mut self, samples: usize) -> Self {
        self.config.frame_length = samples;
        self
    }

    /// Set the hop between frames in samples.
    pub fn hop_length(mut self, samples: usize) -> Self {
        self.config.hop_length = samples;
        self
    }

    /// Set the RMS level below which frames are unvoiced.
    pub fn amplitude_threshold(mut self, rms: f32) -> Self {
        self.config.amplitude_threshold = rms;
        self
    }

    /// Set the searched fundamental range in Hz.
    pub fn frequency_range(mut self, min_hz: f32, max_hz: f32) -> Self {
        self.config.min_frequency_hz = min_hz;
        self.config.max_frequency_hz = max_hz;
        self
    }

    /// Set the strength margin under which octave partners are ambiguous.
    pub fn octave_margin(mut self, margin: f32) -> Self {
        self.config.octave_margin = margin;
        self
    }

    /// Set the per-octave strength penalty for longer lags.
    pub fn octave_cost(mut self, cost: f32) -> Self {
        self.config.octave_cost = cost;
        self
    }

    /// Finalize and create the tracker.
    pub fn build(self) -> Result<PitchTracker, PitchTrackerError> {
        self.config.validate()?;

        // Zero padding to twice the frame keeps the circular autocorrelation linear.
        let fft_size = (2 * self.config.frame_length).next_power_of_two();
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        Ok(PitchTracker {
            config: self.config,
            fft_size,
            forward,
            inverse,
        })
    }
}

/// Batch pitch tracker. Holds only immutable state and may be shared between threads.
pub struct PitchTracker {
    config: PitchConfig,
    fft_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for PitchTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchTracker")
            .field("config", &self.config)
            .field("fft_size", &self.fft_size)
            .finish()
    }
}

/// Searchable lag interval for one sample rate.
#[derive(Debug, Copy, Clone)]
struct LagRange {
    min: usize,
    max: usize,
}

/// Local maximum of the normalized square difference function.
#[derive(Debug, Copy, Clone, PartialEq)]
struct Peak {
    /// Interpolated lag in samples.
    lag: f32,
    /// Interpolated peak height, clamped to `[0, 1]`.
    clarity: f32,
    /// Height after the octave cost, used to rank peaks.
    strength: f32,
}

#[derive(Debug, Clone)]
enum FrameAnalysis {
    Unvoiced,
    Voiced(Vec<Peak>),
}

/// Per-worker FFT and NSDF buffers.
struct Scratch {
    spectrum: Vec<Complex<f32>>,
    nsdf: Vec<f32>,
}

impl Scratch {
    fn new(fft_size: usize, frame_length: usize) -> Self {
        Scratch {
            spectrum: vec![Complex { re: 0.0, im: 0.0 }; fft_size],
            nsdf: vec![0.0; frame_length],
        }
    }
}

impl PitchTracker {
    /// Start customizing with a builder.
    pub fn builder() -> PitchTrackerBuilder {
        PitchTrackerBuilder::new()
    }

    /// Create a tracker from a complete configuration.
    pub fn new(config: PitchConfig) -> Result<Self, PitchTrackerError> {
        PitchTrackerBuilder::new().config(config).build()
    }

    /// Parameters in use.
    pub fn config(&self) -> &PitchConfig {
        &self.config
    }

    /// Number of frames `track` yields for `sample_count` samples.
    ///
    /// Recordings shorter than one frame still yield a single frame; a trailing partial
    /// frame is otherwise dropped.
    pub fn frame_count(&self, sample_count: usize) -> usize {
        if sample_count == 0 {
            0
        } else if sample_count <= self.config.frame_length {
            1
        } else {
            1 + (sample_count - self.config.frame_length) / self.config.hop_length
        }
    }

    /// Lazily estimate pitch frame by frame.
    ///
    /// Returns `Err(InvalidAudio)` for an empty recording, non-finite samples, or a sample
    /// rate that is not positive or leaves no searchable lag for the configured frame.
    pub fn track<'a>(
        &'a self,
        samples: &'a [f32],
        sample_rate: f32,
    ) -> Result<PitchFrames<'a>, PitchTrackerError> {
        let lags = self.check_input(samples, sample_rate)?;
        log::debug!(
            "tracking {} samples at {} Hz in {} frames",
            samples.len(),
            sample_rate,
            self.frame_count(samples.len())
        );
        Ok(PitchFrames {
            tracker: self,
            samples,
            sample_rate,
            lags,
            next_frame: 0,
            frame_count: self.frame_count(samples.len()),
            resolver: OctaveResolver::new(sample_rate, self.config.octave_margin),
            scratch: Scratch::new(self.fft_size, self.config.frame_length),
        })
    }

    /// Estimate every frame's candidates on the rayon pool, then resolve octave choices in
    /// frame order. Produces the same samples as [`PitchTracker::track`].
    pub fn track_parallel(
        &self,
        samples: &[f32],
        sample_rate: f32,
    ) -> Result<Vec<PitchSample>, PitchTrackerError> {
        let lags = self.check_input(samples, sample_rate)?;
        let frame_count = self.frame_count(samples.len());
        log::debug!(
            "tracking {} samples at {} Hz in {} frames (parallel)",
            samples.len(),
            sample_rate,
            frame_count
        );

        let analyses: Vec<FrameAnalysis> = (0..frame_count)
            .into_par_iter()
            .map_init(
                || Scratch::new(self.fft_size, self.config.frame_length),
                |scratch, index| self.analyze_frame(self.frame(samples, index), lags, scratch),
            )
            .collect();

        let mut resolver = OctaveResolver::new(sample_rate, self.config.octave_margin);
        Ok(analyses
            .iter()
            .enumerate()
            .map(|(index, analysis)| resolver.resolve(index, analysis))
            .collect())
    }

    fn check_input(
        &self,
        samples: &[f32],
        sample_rate: f32,
    ) -> Result<LagRange, PitchTrackerError> {
        if samples.is_empty() {
            return Err(PitchTrackerError::invalid_audio("recording contains no samples"));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(PitchTrackerError::invalid_audio(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(PitchTrackerError::invalid_audio(format!(
                "non-finite sample at index {pos}"
            )));
        }

        let min = ((sample_rate / self.config.max_frequency_hz).floor() as usize).max(2);
        let max = ((sample_rate / self.config.min_frequency_hz).ceil() as usize)
            .min(self.config.frame_length - 2);
        if min + 2 > max {
            return Err(PitchTrackerError::invalid_audio(format!(
                "sample rate {sample_rate} Hz leaves no searchable lag in a {}-sample frame",
                self.config.frame_length
            )));
        }
        Ok(LagRange { min, max })
    }

    fn frame<'s>(&self, samples: &'s [f32], index: usize) -> &'s [f32] {
        let start = index * self.config.hop_length;
        let end = (start + self.config.frame_length).min(samples.len());
        &samples[start..end]
    }

    fn analyze_frame(&self, frame: &[f32], lags: LagRange, scratch: &mut Scratch) -> FrameAnalysis {
        let n = frame.len();
        let energy: f32 = frame.iter().map(|x| x * x).sum();
        let rms = (energy / n as f32).sqrt();
        if rms < self.config.amplitude_threshold || energy <= f32::EPSILON {
            return FrameAnalysis::Unvoiced;
        }

        // Autocorrelation by Wiener-Khinchin.
        for (i, bin) in scratch.spectrum.iter_mut().enumerate() {
            *bin = Complex {
                re: frame.get(i).copied().unwrap_or(0.0),
                im: 0.0,
            };
        }
        self.forward.process(&mut scratch.spectrum);
        for bin in scratch.spectrum.iter_mut() {
            *bin = Complex {
                re: bin.norm_sqr(),
                im: 0.0,
            };
        }
        self.inverse.process(&mut scratch.spectrum);
        let scale = 1.0 / self.fft_size as f32;

        // m(tau) = sum of squares of both overlapping segments.
        let nsdf = &mut scratch.nsdf[..n];
        let mut m = 2.0 * energy;
        for (tau, value) in nsdf.iter_mut().enumerate() {
            if tau > 0 {
                m -= frame[tau - 1] * frame[tau - 1] + frame[n - tau] * frame[n - tau];
            }
            let r = scratch.spectrum[tau].re * scale;
            *value = if m > f32::EPSILON { 2.0 * r / m } else { 0.0 };
        }

        let max_lag = lags.max.min(n.saturating_sub(2));
        let mut peaks = Vec::new();
        for tau in lags.min..=max_lag {
            let (a, b, c) = (nsdf[tau - 1], nsdf[tau], nsdf[tau + 1]);
            if b <= 0.0 || b <= a || b < c {
                continue;
            }
            let denom = a - 2.0 * b + c;
            let shift = if denom.abs() > 1e-9 {
                (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
            } else {
                0.0
            };
            let lag = tau as f32 + shift;
            let clarity = (b - 0.25 * (a - c) * shift).clamp(0.0, 1.0);
            let strength = clarity - self.config.octave_cost * (lag / lags.min as f32).log2();
            peaks.push(Peak {
                lag,
                clarity,
                strength,
            });
        }
        FrameAnalysis::Voiced(peaks)
    }
}

/// Sequential octave decision state: the last frequency that was emitted.
#[derive(Debug, Clone)]
struct OctaveResolver {
    sample_rate: f32,
    margin: f32,
    previous_hz: Option<f32>,
}

impl OctaveResolver {
    fn new(sample_rate: f32, margin: f32) -> Self {
        OctaveResolver {
            sample_rate,
            margin,
            previous_hz: None,
        }
    }

    fn resolve(&mut self, frame_index: usize, analysis: &FrameAnalysis) -> PitchSample {
        let peaks = match analysis {
            FrameAnalysis::Unvoiced => return PitchSample::unvoiced(frame_index),
            FrameAnalysis::Voiced(peaks) => peaks,
        };
        let Some(peak) = choose_peak(peaks, self.previous_hz, self.sample_rate, self.margin) else {
            return PitchSample::unvoiced(frame_index);
        };

        let frequency = self.sample_rate / peak.lag;
        self.previous_hz = Some(frequency);
        PitchSample {
            frequency_hz: Some(frequency),
            confidence: peak.clarity,
            frame_index,
        }
    }
}

/// Pick the strongest peak unless a half- or double-lag partner is within `margin` of it.
/// Ambiguous sets resolve to the candidate nearest `previous_hz` in octaves, or with no
/// history to the lowest frequency.
fn choose_peak(
    peaks: &[Peak],
    previous_hz: Option<f32>,
    sample_rate: f32,
    margin: f32,
) -> Option<Peak> {
    let strongest = peaks
        .iter()
        .copied()
        .reduce(|best, p| if p.strength > best.strength { p } else { best })?;

    let mut contenders = vec![strongest];
    for target in [strongest.lag * 2.0, strongest.lag * 0.5] {
        let partner = peaks
            .iter()
            .filter(|p| (p.lag - target).abs() <= (target * PARTNER_LAG_TOLERANCE).max(1.0))
            .min_by(|a, b| (a.lag - target).abs().total_cmp(&(b.lag - target).abs()));
        if let Some(&p) = partner {
            if strongest.strength - p.strength <= margin {
                contenders.push(p);
            }
        }
    }
    if contenders.len() == 1 {
        return Some(strongest);
    }

    // Lowest frequency first so ties below keep it.
    contenders.sort_by(|a, b| b.lag.total_cmp(&a.lag));
    let chosen = match previous_hz {
        Some(prev) => contenders.iter().copied().reduce(|best, p| {
            let distance = |peak: &Peak| (sample_rate / peak.lag / prev).log2().abs();
            if distance(&p) < distance(&best) {
                p
            } else {
                best
            }
        }),
        None => contenders.first().copied(),
    };
    if let Some(peak) = chosen {
        log::trace!(
            "octave-ambiguous frame: {} candidates, chose {:.1} Hz (previous {:?})",
            contenders.len(),
            sample_rate / peak.lag,
            previous_hz
        );
    }
    chosen
}

/// Lazy, single-pass sequence of [`PitchSample`]s, one per frame.
pub struct PitchFrames<'a> {
    tracker: &'a PitchTracker,
    samples: &'a [f32],
    sample_rate: f32,
    lags: LagRange,
    next_frame: usize,
    frame_count: usize,
    resolver: OctaveResolver,
    scratch: Scratch,
}

impl Iterator for PitchFrames<'_> {
    type Item = PitchSample;

    fn next(&mut self) -> Option<PitchSample> {
        if self.next_frame >= self.frame_count {
            return None;
        }
        let index = self.next_frame;
        self.next_frame += 1;

        let frame = self.tracker.frame(self.samples, index);
        let analysis = self.tracker.analyze_frame(frame, self.lags, &mut self.scratch);
        Some(self.resolver.resolve(index, &analysis))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.frame_count - self.next_frame;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PitchFrames<'_> {}

impl FusedIterator for PitchFrames<'_> {}

impl PitchFrames<'_> {
    /// Sample rate the frames are being analysed at.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 22_050.0;

    fn peak(hz: f32, clarity: f32, strength: f32) -> Peak {
        Peak {
            lag: SR / hz,
            clarity,
            strength,
        }
    }

    #[test]
    fn clear_winner_ignores_history() {
        let peaks = [peak(220.0, 0.95, 0.90), peak(110.0, 0.80, 0.70)];
        let chosen = choose_peak(&peaks, Some(110.0), SR, 0.05).map(|p| SR / p.lag);
        assert!((chosen.unwrap_or(0.0) - 220.0).abs() < 0.01);
    }

    #[test]
    fn ambiguous_without_history_prefers_lower_frequency() {
        let peaks = [peak(220.0, 0.95, 0.90), peak(110.0, 0.94, 0.88)];
        let chosen = choose_peak(&peaks, None, SR, 0.05).map(|p| SR / p.lag);
        assert!((chosen.unwrap_or(0.0) - 110.0).abs() < 0.01);
    }

    #[test]
    fn ambiguous_with_history_follows_previous_frame() {
        let peaks = [peak(220.0, 0.95, 0.90), peak(110.0, 0.94, 0.88)];
        let chosen = choose_peak(&peaks, Some(230.0), SR, 0.05).map(|p| SR / p.lag);
        assert!((chosen.unwrap_or(0.0) - 220.0).abs() < 0.01);

        // Double-frequency partner, history near it.
        let peaks = [peak(200.0, 0.95, 0.90), peak(400.0, 0.96, 0.89)];
        let chosen = choose_peak(&peaks, Some(390.0), SR, 0.05).map(|p| SR / p.lag);
        assert!((chosen.unwrap_or(0.0) - 400.0).abs() < 0.01);
    }

    #[test]
    fn unrelated_peaks_are_not_partners() {
        let peaks = [peak(220.0, 0.95, 0.90), peak(147.0, 0.94, 0.89)];
        let chosen = choose_peak(&peaks, None, SR, 0.05).map(|p| SR / p.lag);
        assert!((chosen.unwrap_or(0.0) - 220.0).abs() < 0.01);
    }

    #[test]
    fn no_peaks_means_no_estimate() {
        assert_eq!(choose_peak(&[], None, SR, 0.05), None);
    }
}
