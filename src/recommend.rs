//! Recommendation Engine
//!
//! Ranks songs by how well their stated range fits a singer's range. Ranges are compared
//! as intervals of log2-frequency, so a fixed score always means the same number of
//! semitones of mismatch.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{analyzer::VocalRangeResult, config::RecommendationConfig, note::PitchClass};

/// Largest transposition searched, in semitones, in either direction.
pub const MAX_KEY_ADJUSTMENT: i32 = 12;

const EPSILON: f64 = 1e-9;

/// A catalog entry. Only the key and range take part in scoring; the rest passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    /// Catalog identifier.
    pub id: u64,
    /// Song title, also the final ranking tie-break.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Genre label.
    pub genre: String,
    /// Key the song is recorded in.
    pub original_key: PitchClass,
    /// Lowest sung frequency in Hz.
    #[serde(rename = "lowest_note_hz", alias = "lowest_hz")]
    pub lowest_hz: f64,
    /// Highest sung frequency in Hz.
    #[serde(rename = "highest_note_hz", alias = "highest_hz")]
    pub highest_hz: f64,
    /// Album title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Catalog difficulty rating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<u8>,
    /// Inactive songs are never recommended.
    #[serde(default = "active_by_default", alias = "is_active")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

impl Song {
    /// Create an active song with no optional metadata.
    pub fn new(
        id: u64,
        title: impl Into<String>,
        artist: impl Into<String>,
        genre: impl Into<String>,
        original_key: PitchClass,
        lowest_hz: f64,
        highest_hz: f64,
    ) -> Self {
        Song {
            id,
            title: title.into(),
            artist: artist.into(),
            genre: genre.into(),
            original_key,
            lowest_hz,
            highest_hz,
            album: None,
            difficulty_level: None,
            active: true,
        }
    }

    /// Whether the range is positive, finite and ordered.
    pub fn has_valid_range(&self) -> bool {
        valid_range(self.lowest_hz, self.highest_hz)
    }
}

/// Score and transposition for one song.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The recommended song.
    pub song_id: u64,
    /// Log-frequency overlap with the singer's range after transposition, in `[0, 1]`.
    pub compatibility_score: f64,
    /// Semitones to shift the song by, in `[-12, 12]`.
    pub key_adjustment: i32,
}

/// A recommendation together with the song it refers to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongRecommendation<'a> {
    /// Catalog entry.
    #[serde(flatten)]
    pub song: &'a Song,
    /// See [`Recommendation::compatibility_score`].
    pub compatibility_score: f64,
    /// See [`Recommendation::key_adjustment`].
    pub key_adjustment: i32,
    /// `original_key` after applying `key_adjustment`.
    pub target_key: PitchClass,
}

fn valid_range(low: f64, high: f64) -> bool {
    low.is_finite() && high.is_finite() && low > 0.0 && low <= high
}

/// Interval in log2-Hz.
#[derive(Debug, Copy, Clone)]
struct Octaves {
    low: f64,
    high: f64,
}

impl Octaves {
    fn from_hz(low: f64, high: f64) -> Self {
        Octaves {
            low: low.log2(),
            high: high.log2(),
        }
    }

    fn len(&self) -> f64 {
        self.high - self.low
    }

    fn shifted(&self, semitones: i32) -> Self {
        let by = semitones as f64 / 12.0;
        Octaves {
            low: self.low + by,
            high: self.high + by,
        }
    }

    fn intersection(&self, other: &Octaves) -> f64 {
        (self.high.min(other.high) - self.low.max(other.low)).max(0.0)
    }

    fn contained_in(&self, other: &Octaves) -> bool {
        self.low >= other.low - EPSILON && self.high <= other.high + EPSILON
    }
}

/// Length, in octaves, of the song's range shifted by `semitones` that falls outside the
/// user's range. All ranges are in Hz.
pub fn out_of_range_penalty(
    user_low_hz: f64,
    user_high_hz: f64,
    song_low_hz: f64,
    song_high_hz: f64,
    semitones: i32,
) -> f64 {
    let user = Octaves::from_hz(user_low_hz, user_high_hz);
    let song = Octaves::from_hz(song_low_hz, song_high_hz).shifted(semitones);
    penalty(&user, &song)
}

fn penalty(user: &Octaves, song: &Octaves) -> f64 {
    (song.len() - song.intersection(user)).max(0.0)
}

/// Shift in `[-12, 12]` that leaves the least of the song outside the user's range.
/// Ties go to the smaller shift, then to shifting down.
pub fn best_key_adjustment(
    user_low_hz: f64,
    user_high_hz: f64,
    song_low_hz: f64,
    song_high_hz: f64,
) -> i32 {
    let user = Octaves::from_hz(user_low_hz, user_high_hz);
    let song = Octaves::from_hz(song_low_hz, song_high_hz);
    best_shift(&user, &song)
}

fn best_shift(user: &Octaves, song: &Octaves) -> i32 {
    let mut best = (0i32, penalty(user, song));
    for k in -MAX_KEY_ADJUSTMENT..=MAX_KEY_ADJUSTMENT {
        let p = penalty(user, &song.shifted(k));
        let better = if p < best.1 - EPSILON {
            true
        } else if p <= best.1 + EPSILON {
            (k.abs(), k) < (best.0.abs(), best.0)
        } else {
            false
        };
        if better {
            best = (k, p);
        }
    }
    best.0
}

/// Compatibility of a song shifted by `semitones` with the user's range.
///
/// A shifted song lying inside the user's range scores 1. Otherwise the score is the
/// interval Jaccard index (intersection over union) in log-frequency.
pub fn compatibility_score(
    user_low_hz: f64,
    user_high_hz: f64,
    song_low_hz: f64,
    song_high_hz: f64,
    semitones: i32,
) -> f64 {
    let user = Octaves::from_hz(user_low_hz, user_high_hz);
    let song = Octaves::from_hz(song_low_hz, song_high_hz).shifted(semitones);
    score(&user, &song)
}

fn score(user: &Octaves, song: &Octaves) -> f64 {
    if song.contained_in(user) {
        return 1.0;
    }
    let intersection = song.intersection(user);
    let union = user.len() + song.len() - intersection;
    if union <= EPSILON {
        return 0.0;
    }
    (intersection / union).clamp(0.0, 1.0)
}

/// Builder for a [`RecommendationEngine`].
#[derive(Debug, Clone, Default)]
pub struct RecommendationEngineBuilder {
    config: RecommendationConfig,
}

impl RecommendationEngineBuilder {
    /// Start with the full ranking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every parameter at once.
    pub fn config(mut self, config: RecommendationConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep only the best `k` songs.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = Some(k);
        self
    }

    /// Build the `RecommendationEngine`.
    pub fn build(self) -> RecommendationEngine {
        RecommendationEngine {
            config: self.config,
        }
    }
}

/// Scores catalogs against a vocal range. Stateless between calls.
#[derive(Debug, Clone, Default)]
pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl RecommendationEngine {
    /// Return a builder to customize the result count.
    pub fn builder() -> RecommendationEngineBuilder {
        RecommendationEngineBuilder::new()
    }

    /// Create an engine from its configuration.
    pub fn new(config: RecommendationConfig) -> Self {
        RecommendationEngine { config }
    }

    /// Rank `songs` for `range`, best first.
    ///
    /// Ordering is by score descending, then smaller `|key_adjustment|`, then title.
    /// Inactive songs and songs with a malformed range are left out.
    pub fn recommend(&self, range: &VocalRangeResult, songs: &[Song]) -> Vec<Recommendation> {
        self.rank_range(range.lowest_hz, range.highest_hz, songs)
            .into_iter()
            .map(|(rec, _)| rec)
            .collect()
    }

    /// Like [`RecommendationEngine::recommend`], paired with each song and its target key.
    pub fn recommend_songs<'a>(
        &self,
        range: &VocalRangeResult,
        songs: &'a [Song],
    ) -> Vec<SongRecommendation<'a>> {
        self.rank_range(range.lowest_hz, range.highest_hz, songs)
            .into_iter()
            .map(|(rec, song)| SongRecommendation {
                song,
                compatibility_score: rec.compatibility_score,
                key_adjustment: rec.key_adjustment,
                target_key: song.original_key.transpose(rec.key_adjustment),
            })
            .collect()
    }

    /// Rank `songs` for a raw `[lowest_hz, highest_hz]` range.
    pub fn rank_range<'a>(
        &self,
        lowest_hz: f64,
        highest_hz: f64,
        songs: &'a [Song],
    ) -> Vec<(Recommendation, &'a Song)> {
        if !valid_range(lowest_hz, highest_hz) {
            log::warn!("cannot rank against malformed range {lowest_hz}-{highest_hz} Hz");
            return Vec::new();
        }
        let user = Octaves::from_hz(lowest_hz, highest_hz);

        let mut ranked: Vec<(Recommendation, &Song)> = songs
            .par_iter()
            .filter(|song| song.active)
            .filter_map(|song| {
                if !song.has_valid_range() {
                    log::warn!(
                        "skipping song {} ({:?}): malformed range {}-{} Hz",
                        song.id,
                        song.title,
                        song.lowest_hz,
                        song.highest_hz
                    );
                    return None;
                }
                let original = Octaves::from_hz(song.lowest_hz, song.highest_hz);
                let key_adjustment = best_shift(&user, &original);
                let rec = Recommendation {
                    song_id: song.id,
                    compatibility_score: score(&user, &original.shifted(key_adjustment)),
                    key_adjustment,
                };
                Some((rec, song))
            })
            .collect();

        ranked.sort_by(|(a, song_a), (b, song_b)| rank_order(a, song_a, b, song_b));
        if let Some(k) = self.config.top_k {
            ranked.truncate(k);
        }
        log::debug!(
            "ranked {} of {} songs for {:.2}-{:.2} Hz",
            ranked.len(),
            songs.len(),
            lowest_hz,
            highest_hz
        );
        ranked
    }
}

fn rank_order(a: &Recommendation, song_a: &Song, b: &Recommendation, song_b: &Song) -> Ordering {
    b.compatibility_score
        .total_cmp(&a.compatibility_score)
        .then_with(|| a.key_adjustment.abs().cmp(&b.key_adjustment.abs()))
        .then_with(|| song_a.title.cmp(&song_b.title))
        .then_with(|| a.key_adjustment.cmp(&b.key_adjustment))
        .then_with(|| a.song_id.cmp(&b.song_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_song_prefers_smallest_shift() {
        // Song spans four octaves, user two: every searched shift leaves the same excess.
        assert_eq!(best_key_adjustment(200.0, 800.0, 100.0, 800.0 * 2.0), 0);
    }

    #[test]
    fn smaller_penalty_decides_shift_direction() {
        // The penalty is convex in the shift, so an equal-|k| tie between +k and -k only
        // happens when k = 0 ties too; the downward preference matters at float tolerance.
        // Song is one semitone wider than the user's range and centered on it.
        let user = (200.0, 400.0);
        let half = 2f64.powf(0.5 / 12.0);
        let song = (200.0 / half, 400.0 * half);
        let k = best_key_adjustment(user.0, user.1, song.0, song.1);
        assert_eq!(k, 0);

        // Same width, half a semitone higher at the bottom.
        let song = (200.0 * half, 400.0 * half * half * half);
        let p0 = out_of_range_penalty(user.0, user.1, song.0, song.1, 0);
        let pm1 = out_of_range_penalty(user.0, user.1, song.0, song.1, -1);
        assert!(pm1 < p0);
        assert_eq!(best_key_adjustment(user.0, user.1, song.0, song.1), -1);
    }

    #[test]
    fn disjoint_ranges_score_zero() {
        assert_eq!(compatibility_score(100.0, 150.0, 1000.0, 1500.0, 0), 0.0);
    }
}
