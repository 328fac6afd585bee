//! Integration tests for pitch tracking, range aggregation and the full analysis pipeline
//! using synthesized voice-like signals.

use lazy_static::lazy_static;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::sync::{Arc, Mutex};
use vocal_range::{
    AnalysisConfig, NoteName, PitchSample, PitchTracker, RangeAggregator, RangeConfig,
    RangeError, VocalRangeAnalyzer, VoiceCategory,
};

const SAMPLE_RATE: f32 = 22_050.0;

/// Fundamental plus two decaying harmonics.
fn tone(freq: f64, seconds: f64, amplitude: f64) -> Vec<f32> {
    let len = (seconds * SAMPLE_RATE as f64) as usize;
    let w = 2.0 * std::f64::consts::PI * freq / SAMPLE_RATE as f64;
    (0..len)
        .map(|i| {
            let t = i as f64;
            let s = (w * t).sin() + 0.5 * (2.0 * w * t).sin() + 0.25 * (3.0 * w * t).sin();
            (amplitude * s / 1.75) as f32
        })
        .collect()
}

fn silence(seconds: f64) -> Vec<f32> {
    vec![0.0; (seconds * SAMPLE_RATE as f64) as usize]
}

/// Deterministic low-level noise.
fn hiss(seconds: f64, amplitude: f32) -> Vec<f32> {
    let mut state: u32 = 0x1234_5678;
    (0..(seconds * SAMPLE_RATE as f64) as usize)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            amplitude * ((state as f32 / u32::MAX as f32) * 2.0 - 1.0)
        })
        .collect()
}

/// D3 F3 A3 D4 F4 A4 D5, each note followed by a short breath.
fn arpeggio() -> Vec<f32> {
    let mut out = Vec::new();
    for hz in [146.83, 174.61, 220.0, 293.66, 349.23, 440.0, 587.33] {
        out.extend(tone(hz, 0.4, 0.5));
        out.extend(silence(0.1));
    }
    out
}

lazy_static! {
    static ref ARPEGGIO: Vec<f32> = arpeggio();
    static ref TRACKER: PitchTracker = PitchTracker::builder().build().unwrap();
}

#[test]
fn test_pitch_tracker_on_sustained_tones() {
    let targets: Vec<f64> = vec![82.41, 110.0, 146.83, 220.0, 329.63, 440.0, 587.33, 880.0, 1046.5];
    let failures = Arc::new(Mutex::new(Vec::<String>::new()));

    targets.par_iter().for_each(|&target| {
        let samples = tone(target, 0.5, 0.5);
        let frames: Vec<PitchSample> = TRACKER.track(&samples, SAMPLE_RATE).unwrap().collect();

        for frame in &frames {
            let Some(hz) = frame.frequency_hz else {
                failures
                    .lock()
                    .unwrap()
                    .push(format!("{target} Hz: frame {} unvoiced", frame.frame_index));
                continue;
            };
            let error = (hz as f64 - target).abs() / target;
            if error > 0.02 || frame.confidence < 0.8 {
                failures.lock().unwrap().push(format!(
                    "{target} Hz: frame {} estimated {hz:.2} Hz, confidence {:.3}",
                    frame.frame_index, frame.confidence
                ));
            }
        }

        let note = NoteName::from_hz(frames[frames.len() / 2].frequency_hz.unwrap_or(0.0) as f64);
        if note != NoteName::from_hz(target) {
            failures
                .lock()
                .unwrap()
                .push(format!("{target} Hz: named {note}"));
        }
    });

    let failures = Arc::try_unwrap(failures).unwrap().into_inner().unwrap();
    assert!(failures.is_empty(), "{} frames failed:\n{}", failures.len(), failures.join("\n"));
}

#[test]
fn test_frames_follow_frame_and_hop_lengths() {
    let tracker = PitchTracker::builder()
        .frame_length(1024)
        .hop_length(256)
        .build()
        .unwrap();
    let samples = tone(220.0, 1.0, 0.5);
    let frames = tracker.track(&samples, SAMPLE_RATE).unwrap();
    let expected = 1 + (samples.len() - 1024) / 256;
    assert_eq!(frames.len(), expected);
    assert_eq!(frames.sample_rate(), SAMPLE_RATE);

    let indices: Vec<usize> = frames.map(|f| f.frame_index).collect();
    assert_eq!(indices, (0..expected).collect::<Vec<_>>());

    // Shorter than one frame still yields a single frame.
    let short = tone(220.0, 0.02, 0.5);
    assert_eq!(tracker.track(&short, SAMPLE_RATE).unwrap().count(), 1);
}

#[test]
fn test_quiet_frames_are_unvoiced() {
    let samples = hiss(0.5, 0.005);
    for frame in TRACKER.track(&samples, SAMPLE_RATE).unwrap() {
        assert_eq!(frame.frequency_hz, None);
        assert_eq!(frame.confidence, 0.0);
    }
}

#[test]
fn test_parallel_tracking_matches_lazy_tracking() {
    let lazy: Vec<PitchSample> = TRACKER.track(&ARPEGGIO, SAMPLE_RATE).unwrap().collect();
    let parallel = TRACKER.track_parallel(&ARPEGGIO, SAMPLE_RATE).unwrap();
    assert_eq!(lazy, parallel);
}

#[test]
fn test_invalid_audio_is_rejected() {
    let analyzer = VocalRangeAnalyzer::new(AnalysisConfig::default()).unwrap();

    let err = analyzer.analyze(&[]).unwrap_err();
    assert!(err.is_invalid_audio(), "{err}");

    for rate in [0.0, -22_050.0, f32::NAN] {
        let err = analyzer.analyze_at(&ARPEGGIO, rate).unwrap_err();
        assert!(err.is_invalid_audio(), "rate {rate}: {err}");
    }

    let mut samples = tone(220.0, 0.2, 0.5);
    samples[100] = f32::INFINITY;
    assert!(analyzer.analyze(&samples).unwrap_err().is_invalid_audio());
}

#[test]
fn test_quiet_recording_has_insufficient_signal() {
    let analyzer = VocalRangeAnalyzer::new(AnalysisConfig::default()).unwrap();
    let mut samples = hiss(1.0, 0.01);
    samples.extend(silence(0.5));

    let err = analyzer.analyze(&samples).unwrap_err();
    assert!(err.is_insufficient_signal(), "{err}");
    assert!(!err.is_invalid_audio());
}

#[test]
fn test_confidence_is_fraction_of_retained_frames() {
    let config = RangeConfig {
        confidence_min_threshold: 0.3,
        ..RangeConfig::default()
    };
    let samples = (0..10).map(|i| PitchSample {
        frequency_hz: Some(220.0),
        confidence: if i % 5 < 2 { 0.5 } else { 0.1 },
        frame_index: i,
    });

    let range = RangeAggregator::aggregate(config, samples).unwrap();
    assert!((range.confidence_score - 0.4).abs() < 1e-12, "{range:?}");
    assert_eq!(range.voiced_frames, 4);
    assert_eq!(range.retained_frames, 4);
    assert_eq!(range.total_frames, 10);
}

#[test]
fn test_rejected_glitch_still_counts_as_voiced() {
    let samples = [220.0, 221.0, 219.0, 440.0, 220.0, 222.0]
        .iter()
        .enumerate()
        .map(|(i, &hz)| PitchSample {
            frequency_hz: Some(hz),
            confidence: 0.9,
            frame_index: i,
        });

    let range = RangeAggregator::aggregate(RangeConfig::default(), samples).unwrap();
    assert!(range.highest_hz < 230.0, "{range:?}");
    assert_eq!(range.rejected_outliers, 1);
    assert_eq!(range.retained_frames, 5);
    assert_eq!(range.confidence_score, 1.0);
}

#[test]
fn test_aggregator_fails_without_confident_frames() {
    let samples = (0..20).map(|i| PitchSample {
        frequency_hz: if i % 2 == 0 { Some(300.0) } else { None },
        confidence: 0.1,
        frame_index: i,
    });
    match RangeAggregator::aggregate(RangeConfig::default(), samples) {
        Err(RangeError::InsufficientSignal { total_frames }) => assert_eq!(total_frames, 20),
        other => panic!("expected insufficient signal, got {other:?}"),
    }
}

#[test]
fn test_arpeggio_range_and_classification() {
    for parallel_pitch in [false, true] {
        let config = AnalysisConfig {
            parallel_pitch,
            ..AnalysisConfig::default()
        };
        let analyzer = VocalRangeAnalyzer::new(config).unwrap();
        let result = analyzer.analyze(&ARPEGGIO).unwrap();

        assert_eq!(result.lowest_note.to_string(), "D3", "{result:?}");
        assert_eq!(result.highest_note.to_string(), "D5", "{result:?}");
        assert_eq!(result.vocal_range_type, VoiceCategory::Tenor);
        assert!(result.lowest_hz <= result.highest_hz);
        assert!(
            result.confidence_score > 0.5 && result.confidence_score <= 1.0,
            "{result:?}"
        );
    }
}

#[test]
fn test_isolated_octave_glitch_does_not_extend_range() {
    // A single frame-sized burst one octave up in the middle of a sustained A3.
    let frame = AnalysisConfig::default().pitch.frame_length;
    let mut samples = tone(220.0, 0.5, 0.5);
    let glitch = tone(440.0, frame as f64 / SAMPLE_RATE as f64, 0.5);
    samples.extend(glitch);
    samples.extend(tone(220.0, 0.5, 0.5));

    let analyzer = VocalRangeAnalyzer::new(AnalysisConfig::default()).unwrap();
    let result = analyzer.analyze(&samples).unwrap();
    assert!(result.lowest_hz > 200.0, "{result:?}");
    assert!(result.highest_hz < 300.0, "{result:?}");
}

#[test]
fn test_session_record_rounds_to_two_decimals() {
    let analyzer = VocalRangeAnalyzer::new(AnalysisConfig::default()).unwrap();
    let result = analyzer.analyze(&ARPEGGIO).unwrap();
    let record = result.session_record();

    assert_eq!(record.lowest_note_name, "D3");
    assert_eq!(record.highest_note_name, "D5");
    let two_decimals = |v: f64| ((v * 100.0).round() - v * 100.0).abs() < 1e-6;
    assert!(two_decimals(record.lowest_note_hz));
    assert!(two_decimals(record.confidence_score));

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["vocal_range_type"], "tenor");
    assert_eq!(json["lowest_note_name"], "D3");
}
