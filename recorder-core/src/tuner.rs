//! Grades a detected pitch against the note the player should be playing.
//! Message text and localisation belong to the host.

use serde::{Deserialize, Serialize};

use crate::detector::PitchResult;
use crate::tuning::NoteId;

/// Within this many cents of the target counts as perfect.
pub const PERFECT_CENTS: f32 = 20.0;
/// Within this many cents of the target counts as good.
pub const GOOD_CENTS: f32 = 50.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TunerStatus {
    /// Microphone off, or nothing detected this cycle.
    Waiting,
    /// No target note; just report what was heard.
    Neutral { note: NoteId },
    Perfect,
    Good,
    /// Right note but more than `GOOD_CENTS` away.
    Off { sharp: bool },
    /// A different note than the target was heard.
    Wrong { detected: NoteId },
}

pub fn tuner_status(
    mic_active: bool,
    detected: Option<&PitchResult>,
    target: Option<&NoteId>,
) -> TunerStatus {
    let detected = match detected {
        Some(d) if mic_active => d,
        _ => return TunerStatus::Waiting,
    };

    let Some(target) = target else {
        return TunerStatus::Neutral { note: detected.note.clone() };
    };

    if !detected.note.same_pitch(target) {
        return TunerStatus::Wrong { detected: detected.note.clone() };
    }

    let cents = detected.cents_offset.abs();
    if cents < PERFECT_CENTS {
        TunerStatus::Perfect
    } else if cents < GOOD_CENTS {
        TunerStatus::Good
    } else {
        TunerStatus::Off { sharp: detected.cents_offset > 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(note: &str, cents: f32) -> PitchResult {
        PitchResult { note: note.parse().unwrap(), cents_offset: cents, frequency: 0.0 }
    }

    #[test]
    fn waits_without_mic_or_pitch() {
        let c5: NoteId = "C5".parse().unwrap();
        assert_eq!(tuner_status(false, Some(&reading("C5", 0.0)), Some(&c5)), TunerStatus::Waiting);
        assert_eq!(tuner_status(true, None, Some(&c5)), TunerStatus::Waiting);
    }

    #[test]
    fn neutral_without_target() {
        assert_eq!(
            tuner_status(true, Some(&reading("D5", 3.0)), None),
            TunerStatus::Neutral { note: "D5".parse().unwrap() }
        );
    }

    #[test]
    fn grades_by_cents() {
        let c5: NoteId = "C5".parse().unwrap();
        assert_eq!(tuner_status(true, Some(&reading("C5", -19.9)), Some(&c5)), TunerStatus::Perfect);
        assert_eq!(tuner_status(true, Some(&reading("C5", 20.0)), Some(&c5)), TunerStatus::Good);
        assert_eq!(tuner_status(true, Some(&reading("C5", 49.0)), Some(&c5)), TunerStatus::Good);
        assert_eq!(
            tuner_status(true, Some(&reading("C5", 50.0)), Some(&c5)),
            TunerStatus::Off { sharp: true }
        );
        assert_eq!(
            tuner_status(true, Some(&reading("C5", -60.0)), Some(&c5)),
            TunerStatus::Off { sharp: false }
        );
    }

    #[test]
    fn flat_target_matches_sharp_reading() {
        let b_flat: NoteId = "Bb5".parse().unwrap();
        let heard = PitchResult::from_frequency(932.33);
        assert_eq!(heard.note.as_str(), "A#5");
        assert_eq!(tuner_status(true, Some(&heard), Some(&b_flat)), TunerStatus::Perfect);
    }

    #[test]
    fn wrong_note_reports_what_was_heard() {
        let c5: NoteId = "C5".parse().unwrap();
        assert_eq!(
            tuner_status(true, Some(&reading("D5", 0.0)), Some(&c5)),
            TunerStatus::Wrong { detected: "D5".parse().unwrap() }
        );
    }
}
