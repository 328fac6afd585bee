//! Note naming
//!
//! Equal-tempered mapping between frequencies and named notes, referenced to A4 = 440 Hz.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const SEMITONES: i32 = 12;

/// Reference pitch for A4 in Hz.
pub const A4_HZ: f64 = 440.0;

/// Semitones from C to A within one octave.
const A_FROM_C: i32 = 9;

/// Offsets this close to a half semitone are treated as exact ties.
const TIE_TOLERANCE: f64 = 1e-9;

/// Twelve chromatic pitch classes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    /// C
    #[serde(rename = "C")]
    C,
    /// C sharp / D flat
    #[serde(rename = "C#")]
    Cs,
    /// D
    #[serde(rename = "D")]
    D,
    /// D sharp / E flat
    #[serde(rename = "D#")]
    Ds,
    /// E
    #[serde(rename = "E")]
    E,
    /// F
    #[serde(rename = "F")]
    F,
    /// F sharp / G flat
    #[serde(rename = "F#")]
    Fs,
    /// G
    #[serde(rename = "G")]
    G,
    /// G sharp / A flat
    #[serde(rename = "G#")]
    Gs,
    /// A
    #[serde(rename = "A")]
    A,
    /// A sharp / B flat
    #[serde(rename = "A#")]
    As,
    /// B
    #[serde(rename = "B")]
    B,
}

const PITCH_CLASSES: [PitchClass; SEMITONES as usize] = [
    PitchClass::C,
    PitchClass::Cs,
    PitchClass::D,
    PitchClass::Ds,
    PitchClass::E,
    PitchClass::F,
    PitchClass::Fs,
    PitchClass::G,
    PitchClass::Gs,
    PitchClass::A,
    PitchClass::As,
    PitchClass::B,
];

const SHARP_NAMES: [&str; SEMITONES as usize] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl PitchClass {
    /// Pitch class for a semitone index counted from C. Any integer is accepted and
    /// wrapped into the octave.
    pub const fn from_index(idx: i32) -> PitchClass {
        PITCH_CLASSES[idx.rem_euclid(SEMITONES) as usize]
    }

    /// Semitone index counted from C, in `0..12`.
    pub const fn index(self) -> i32 {
        self as i32
    }

    /// Shift by `semitones`, wrapping around the octave.
    pub const fn transpose(self, semitones: i32) -> PitchClass {
        PitchClass::from_index(self.index() + semitones)
    }

    /// Name using sharps, e.g. `"F#"`.
    pub const fn name(self) -> &'static str {
        SHARP_NAMES[self as usize]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors produced when parsing note or pitch class names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteParseError {
    /// The letter or accidental was not recognised.
    #[error("unrecognized pitch class `{0}`")]
    PitchClass(String),

    /// The octave suffix was missing or not an integer.
    #[error("invalid octave in note `{0}`")]
    Octave(String),
}

impl FromStr for PitchClass {
    type Err = NoteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(NoteParseError::PitchClass(s.to_string())),
        };
        let accidental = match chars.as_str() {
            "" => 0,
            "#" | "♯" | "s" => 1,
            "b" | "♭" => -1,
            _ => return Err(NoteParseError::PitchClass(s.to_string())),
        };
        Ok(PitchClass::from_index(base + accidental))
    }
}

/// A named note: pitch class plus scientific octave number, e.g. `F3`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NoteName {
    /// Octave in scientific pitch notation (C4 is middle C).
    pub octave: i32,
    /// Pitch class within the octave.
    pub pitch_class: PitchClass,
}

impl NoteName {
    /// Name the note nearest to `frequency_hz`.
    ///
    /// Total over positive frequencies; extreme inputs simply yield extreme octaves.
    pub fn from_hz(frequency_hz: f64) -> NoteName {
        NoteName::from_semitone(semitone_offset(frequency_hz))
    }

    /// Note `n` semitones away from A4.
    pub fn from_semitone(n: i32) -> NoteName {
        let from_c = n + A_FROM_C;
        NoteName {
            pitch_class: PitchClass::from_index(from_c),
            octave: 4 + from_c.div_euclid(SEMITONES),
        }
    }

    /// Semitone offset of this note from A4.
    pub fn semitone(&self) -> i32 {
        (self.octave - 4) * SEMITONES + self.pitch_class.index() - A_FROM_C
    }

    /// Equal-tempered frequency of this note.
    pub fn hz(&self) -> f64 {
        semitone_to_hz(self.semitone())
    }
}

/// Nearest semitone offset from A4, ties rounded away from zero.
pub fn semitone_offset(frequency_hz: f64) -> i32 {
    let offset = SEMITONES as f64 * (frequency_hz / A4_HZ).log2();
    let offset = if (offset.fract().abs() - 0.5).abs() < TIE_TOLERANCE {
        offset.trunc() + 0.5 * offset.signum()
    } else {
        offset
    };
    offset.round() as i32
}

/// Frequency of the note `n` semitones away from A4.
pub fn semitone_to_hz(n: i32) -> f64 {
    A4_HZ * 2f64.powf(n as f64 / SEMITONES as f64)
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

impl FromStr for NoteName {
    type Err = NoteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| c == '-' || c.is_ascii_digit())
            .ok_or_else(|| NoteParseError::Octave(s.to_string()))?;
        let (class, octave) = s.split_at(split);
        // "Cb4" and "B#3" cross the octave boundary.
        let natural: PitchClass = class
            .get(..1)
            .ok_or_else(|| NoteParseError::PitchClass(s.to_string()))?
            .parse()?;
        let pitch_class: PitchClass = class.parse()?;
        let octave: i32 = octave
            .parse()
            .map_err(|_| NoteParseError::Octave(s.to_string()))?;
        let carry = match (natural, pitch_class) {
            (PitchClass::C, PitchClass::B) => -1,
            (PitchClass::B, PitchClass::C) => 1,
            _ => 0,
        };
        Ok(NoteName {
            pitch_class,
            octave: octave + carry,
        })
    }
}

impl Serialize for NoteName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NoteName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flats_and_boundary_crossings_parse() {
        assert_eq!("Db".parse::<PitchClass>(), Ok(PitchClass::Cs));
        assert_eq!("Cb4".parse::<NoteName>().map(|n| n.to_string()), Ok("B3".into()));
        assert_eq!("B#3".parse::<NoteName>().map(|n| n.to_string()), Ok("C4".into()));
        assert_eq!("A-1".parse::<NoteName>().map(|n| n.octave), Ok(-1));
        assert!("H2".parse::<NoteName>().is_err());
        assert!("C".parse::<NoteName>().is_err());
    }
}
