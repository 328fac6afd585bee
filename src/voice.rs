//! Voice classification
//!
//! Maps a measured range onto one of six overlapping voice bands. Overlap is measured in
//! log-frequency, so one semitone counts the same anywhere in the table.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

const EPSILON: f64 = 1e-12;

/// Voice categories, ordered from lowest to highest.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoiceCategory {
    /// Bass
    Bass,
    /// Baritone
    Baritone,
    /// Tenor
    Tenor,
    /// Alto
    Alto,
    /// Mezzo-soprano
    MezzoSoprano,
    /// Soprano
    Soprano,
    /// Degenerate input range
    Unknown,
}

impl VoiceCategory {
    /// Stable lowercase name, e.g. `"mezzo-soprano"`.
    pub const fn name(self) -> &'static str {
        match self {
            VoiceCategory::Bass => "bass",
            VoiceCategory::Baritone => "baritone",
            VoiceCategory::Tenor => "tenor",
            VoiceCategory::Alto => "alto",
            VoiceCategory::MezzoSoprano => "mezzo-soprano",
            VoiceCategory::Soprano => "soprano",
            VoiceCategory::Unknown => "unknown",
        }
    }
}

impl Display for VoiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the band table.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceBand {
    /// Category this band defines.
    pub category: VoiceCategory,
    /// Lower edge in Hz.
    pub low_hz: f64,
    /// Upper edge in Hz.
    pub high_hz: f64,
}

impl VoiceBand {
    const fn new(category: VoiceCategory, low_hz: f64, high_hz: f64) -> Self {
        VoiceBand {
            category,
            low_hz,
            high_hz,
        }
    }

    fn log_edges(&self) -> (f64, f64) {
        (self.low_hz.log2(), self.high_hz.log2())
    }
}

/// The standard table: bass E2–D4 up to soprano C4–C6.
pub fn default_bands() -> Vec<VoiceBand> {
    vec![
        VoiceBand::new(VoiceCategory::Bass, 82.0, 294.0),
        VoiceBand::new(VoiceCategory::Baritone, 98.0, 349.0),
        VoiceBand::new(VoiceCategory::Tenor, 131.0, 523.0),
        VoiceBand::new(VoiceCategory::Alto, 175.0, 698.0),
        VoiceBand::new(VoiceCategory::MezzoSoprano, 220.0, 880.0),
        VoiceBand::new(VoiceCategory::Soprano, 262.0, 1047.0),
    ]
}

/// Reject empty tables, malformed bands and tables out of center order.
pub(crate) fn validate_bands(bands: &[VoiceBand]) -> Result<(), ConfigError> {
    if bands.is_empty() {
        return Err(ConfigError::invalid("voice_bands", "table cannot be empty"));
    }
    let mut last_center = f64::NEG_INFINITY;
    for band in bands {
        if band.category == VoiceCategory::Unknown {
            return Err(ConfigError::invalid("voice_bands", "`unknown` cannot define a band"));
        }
        let valid = band.low_hz.is_finite()
            && band.high_hz.is_finite()
            && band.low_hz > 0.0
            && band.low_hz < band.high_hz;
        if !valid {
            return Err(ConfigError::invalid(
                "voice_bands",
                format!("bad edges for {}: [{}, {}]", band.category, band.low_hz, band.high_hz),
            ));
        }
        let (lo, hi) = band.log_edges();
        let center = (lo + hi) / 2.0;
        if center <= last_center {
            return Err(ConfigError::invalid(
                "voice_bands",
                format!("{} is out of increasing center order", band.category),
            ));
        }
        last_center = center;
    }
    Ok(())
}

/// Classifies frequency ranges against a band table.
#[derive(Debug, Clone)]
pub struct VoiceClassifier {
    bands: Vec<VoiceBand>,
}

impl Default for VoiceClassifier {
    fn default() -> Self {
        VoiceClassifier {
            bands: default_bands(),
        }
    }
}

/// How a band compares to the measured range; larger `fit` is better.
#[derive(Debug, Copy, Clone)]
struct BandFit {
    fit: f64,
    center_distance: f64,
}

impl BandFit {
    fn beats(&self, other: &BandFit) -> bool {
        if self.fit > other.fit + EPSILON {
            return true;
        }
        if self.fit < other.fit - EPSILON {
            return false;
        }
        self.center_distance < other.center_distance - EPSILON
    }
}

impl VoiceClassifier {
    /// Use a custom band table. Bands must be listed in increasing center frequency.
    pub fn new(bands: Vec<VoiceBand>) -> Result<Self, ConfigError> {
        validate_bands(&bands)?;
        Ok(VoiceClassifier { bands })
    }

    /// The band table in use.
    pub fn bands(&self) -> &[VoiceBand] {
        &self.bands
    }

    /// Classify `[lowest_hz, highest_hz]`.
    ///
    /// The band with the greatest log-frequency overlap wins; ties go to the band whose
    /// center is nearest the range center, then to the lower band. A range touching no
    /// band goes to the band with the nearest edge. Only non-positive or non-finite input
    /// yields [`VoiceCategory::Unknown`].
    pub fn classify(&self, lowest_hz: f64, highest_hz: f64) -> VoiceCategory {
        let usable = |hz: f64| hz.is_finite() && hz > 0.0;
        if !usable(lowest_hz) || !usable(highest_hz) {
            return VoiceCategory::Unknown;
        }
        let (lo, hi) = if lowest_hz <= highest_hz {
            (lowest_hz.log2(), highest_hz.log2())
        } else {
            (highest_hz.log2(), lowest_hz.log2())
        };
        let mid = (lo + hi) / 2.0;

        let overlaps: Vec<(f64, f64)> = self
            .bands
            .iter()
            .map(|band| {
                let (bl, bh) = band.log_edges();
                let overlap = (hi.min(bh) - lo.max(bl)).max(0.0);
                let gap = (bl - hi).max(lo - bh).max(0.0);
                (overlap, gap)
            })
            .collect();
        let any_overlap = overlaps.iter().any(|&(overlap, _)| overlap > EPSILON);

        let mut best: Option<(usize, BandFit)> = None;
        for (i, (band, &(overlap, gap))) in self.bands.iter().zip(&overlaps).enumerate() {
            let (bl, bh) = band.log_edges();
            let candidate = BandFit {
                fit: if any_overlap { overlap } else { -gap },
                center_distance: ((bl + bh) / 2.0 - mid).abs(),
            };
            let replace = match &best {
                Some((_, current)) => candidate.beats(current),
                None => true,
            };
            if replace {
                best = Some((i, candidate));
            }
        }

        let category = best.map_or(VoiceCategory::Unknown, |(i, _)| self.bands[i].category);
        log::debug!(
            "classified {:.2}-{:.2} Hz as {} (overlap mode: {})",
            lowest_hz,
            highest_hz,
            category,
            any_overlap
        );
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_tables_out_of_order() {
        let mut bands = default_bands();
        bands.swap(0, 5);
        assert!(VoiceClassifier::new(bands).is_err());
        assert!(VoiceClassifier::new(Vec::new()).is_err());
    }

    #[test]
    fn point_range_inside_several_bands_goes_to_nearest_center() {
        let classifier = VoiceClassifier::default();
        // 440 Hz lies in alto, mezzo-soprano and soprano; the mezzo center (440 Hz) is nearest.
        assert_eq!(classifier.classify(440.0, 440.0), VoiceCategory::MezzoSoprano);
    }
}
