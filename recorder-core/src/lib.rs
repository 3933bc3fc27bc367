// recorder-core/src/lib.rs

//! The core logic for the recorder practice trainer.
//! This crate is responsible for microphone pitch detection and for the
//! clock-driven step sequencer that plays the guide melody. It is completely
//! headless and contains no GUI code.

pub mod audio;
pub mod clock;
pub mod config;
pub mod detector;
pub mod error;
pub mod pitch;
pub mod scheduler;
pub mod synth;
pub mod transport;
pub mod tuner;
pub mod tuning;

pub use clock::{AudioClock, FrameClock, ManualClock};
pub use config::{EngineConfig, PitchConfig};
pub use detector::{PitchDetector, PitchResult};
pub use error::{CaptureError, ConfigError, OutputError, ParseNoteError};
pub use synth::{NoteSink, RecordingSink, Sound, SynthHandle, SynthOutput};
pub use transport::{PlaybackOptions, SequenceTransport, TransportState, is_playable};
pub use tuner::{TunerStatus, tuner_status};
pub use tuning::NoteId;

/// One slot of a step grid: a note, or `None` for a rest.
pub type Step = Option<NoteId>;

/// Parses a comma-separated grid such as `"C5,-,D5,."`.
///
/// `-`, `.` and empty entries are rests.
pub fn parse_grid(text: &str) -> Result<Vec<Step>, ParseNoteError> {
    text.split(',')
        .map(str::trim)
        .map(|slot| match slot {
            "" | "-" | "." => Ok(None),
            name => name.parse().map(Some),
        })
        .collect()
}
