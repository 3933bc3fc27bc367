//! # Musical Tuning Module
//!
//! This module provides the note vocabulary shared by the pitch detector and the
//! sequencer: note identifiers, the reference frequency table used for
//! nearest-note classification, and cent deviation measurements.
//!
//! ## Features
//! - Validated note identifiers (`C5`, `F#5`, `Bb5`, ...)
//! - Equal temperament frequencies (A4 = 440 Hz) for any note identifier
//! - Reference table covering the soprano recorder range (C5 to A6)
//! - Nearest-note lookup by absolute Hz distance
//! - Cent deviation calculations

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseNoteError;

/// Reference frequencies used for nearest-note classification.
///
/// Linear in Hz, ordered from low to high. The instrument's upper register is
/// sparse: F#6 and G#6 are not listed.
pub const NOTE_FREQUENCIES: [(&str, f32); 20] = [
    ("C5", 523.25),
    ("C#5", 554.37),
    ("D5", 587.33),
    ("D#5", 622.25),
    ("E5", 659.25),
    ("F5", 698.46),
    ("F#5", 739.99),
    ("G5", 783.99),
    ("G#5", 830.61),
    ("A5", 880.00),
    ("A#5", 932.33),
    ("B5", 987.77),
    ("C6", 1046.50),
    ("C#6", 1108.73),
    ("D6", 1174.66),
    ("D#6", 1244.51),
    ("E6", 1318.51),
    ("F6", 1396.91),
    ("G6", 1567.98),
    ("A6", 1760.00),
];

/// The playable scale of the instrument, low to high.
pub const SCALE_ORDER: [&str; 9] = ["C5", "D5", "E5", "F5", "G5", "A5", "B5", "C6", "D6"];

/// Static map for quick note name to reference frequency lookups.
static NOTE_MAP: Lazy<BTreeMap<&'static str, f32>> =
    Lazy::new(|| NOTE_FREQUENCIES.iter().copied().collect());

/// A note name plus octave, e.g. `C5`, `F#5` or `Bb5`.
///
/// The identifier is validated on construction, so every `NoteId` has a
/// well-defined equal temperament frequency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NoteId(String);

impl NoteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// MIDI note number of this note (C4 = 60, A4 = 69).
    pub fn midi_number(&self) -> i32 {
        // Validated in `from_str`, so the parse cannot fail here.
        let (semitone, octave) = parse_parts(&self.0).unwrap_or((0, 4));
        (octave + 1) * 12 + semitone
    }

    /// True when both identifiers name the same pitch, e.g. `A#5` and `Bb5`.
    pub fn same_pitch(&self, other: &NoteId) -> bool {
        self.midi_number() == other.midi_number()
    }

    /// Equal temperament frequency of this note in Hz, with A4 = 440 Hz.
    pub fn frequency(&self) -> f32 {
        440.0 * 2.0_f32.powf((self.midi_number() - 69) as f32 / 12.0)
    }

    /// Frequency from the reference table, when the note is listed there.
    pub fn table_frequency(&self) -> Option<f32> {
        table_frequency(&self.0)
    }
}

/// Octaves a note identifier may name (the MIDI range).
const OCTAVE_RANGE: std::ops::RangeInclusive<i32> = -1..=9;

/// Splits a note identifier into (semitone offset from C, octave).
fn parse_parts(s: &str) -> Option<(i32, i32)> {
    let mut chars = s.chars();
    let base = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let (accidental, octave) = if let Some(r) = rest.strip_prefix('#') {
        (1, r)
    } else if let Some(r) = rest.strip_prefix('b') {
        (-1, r)
    } else {
        (0, rest)
    };

    let digits = octave.strip_prefix('-').unwrap_or(octave);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let octave: i32 = octave.parse().ok()?;
    if !OCTAVE_RANGE.contains(&octave) {
        return None;
    }
    Some((base + accidental, octave))
}

impl FromStr for NoteId {
    type Err = ParseNoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match parse_parts(trimmed) {
            Some(_) => Ok(NoteId(trimmed.to_string())),
            None => Err(ParseNoteError(s.to_string())),
        }
    }
}

impl TryFrom<String> for NoteId {
    type Error = ParseNoteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NoteId> for String {
    fn from(note: NoteId) -> Self {
        note.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finds the closest reference note to a given frequency.
///
/// Distance is measured in absolute Hz, not in cents. Because the table is
/// linear in Hz this biases borderline frequencies towards the lower note;
/// exact ties resolve to the lower entry.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
///
/// # Returns
/// * `(note_name, table_frequency)` - Closest note name and its reference frequency
pub fn find_nearest_note(freq: f32) -> (&'static str, f32) {
    NOTE_FREQUENCIES
        .iter()
        .copied()
        .min_by(|a, b| {
            let diff_a = (a.1 - freq).abs();
            let diff_b = (b.1 - freq).abs();
            diff_a.total_cmp(&diff_b)
        })
        .unwrap_or(NOTE_FREQUENCIES[0])
}

/// Looks up the reference frequency of a note listed in the table.
pub fn table_frequency(name: &str) -> Option<f32> {
    NOTE_MAP.get(name).copied()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// # Arguments
/// * `freq` - Measured frequency in Hz
/// * `target_freq` - Target frequency in Hz
///
/// # Returns
/// * Cent deviation (positive = sharp, negative = flat)
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}
