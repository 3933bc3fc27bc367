//! # Pitch Detector
//!
//! Owns a microphone capture session and a reusable analysis window, and turns
//! the latest window into a best-effort note estimate on demand.

use serde::{Deserialize, Serialize};

use crate::audio::{CaptureSource, CpalCapture};
use crate::config::PitchConfig;
use crate::error::CaptureError;
use crate::pitch;
use crate::tuning::{self, NoteId};

/// A single detection: nearest reference note, signed cents offset and the
/// estimated frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchResult {
    pub note: NoteId,
    /// Negative is flat, positive is sharp, relative to `note`'s reference frequency.
    pub cents_offset: f32,
    pub frequency: f32,
}

impl PitchResult {
    /// Classifies a frequency against the reference table.
    pub fn from_frequency(frequency: f32) -> Self {
        let (name, target) = tuning::find_nearest_note(frequency);
        let note = name
            .parse()
            .unwrap_or_else(|_| unreachable!("reference table holds valid note ids"));
        Self {
            note,
            cents_offset: tuning::calculate_cents_deviation(frequency, target),
            frequency,
        }
    }
}

/// Pull-based pitch detector.
///
/// `detect()` is meant to be polled from a display-rate loop. It never waits
/// for audio and allocates nothing after the first call: the analysis window
/// and the correlation scratch space are reused.
pub struct PitchDetector<S: CaptureSource = CpalCapture> {
    source: S,
    config: PitchConfig,
    buffer: Vec<f32>,
    correlations: Vec<f32>,
    sample_rate: Option<u32>,
}

impl PitchDetector<CpalCapture> {
    /// Detector reading from the default microphone.
    pub fn default_input(config: PitchConfig) -> Self {
        let capacity = config.window_size;
        Self::new(CpalCapture::new(capacity), config)
    }
}

impl<S: CaptureSource> PitchDetector<S> {
    pub fn new(source: S, config: PitchConfig) -> Self {
        let window = config.window_size;
        Self {
            source,
            config,
            buffer: vec![0.0; window],
            correlations: Vec::with_capacity(window),
            sample_rate: None,
        }
    }

    /// Opens the capture pipeline. Returns immediately when already listening.
    ///
    /// On failure the source is closed again, so a failed start leaves the
    /// detector exactly as it was.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.sample_rate.is_some() {
            return Ok(());
        }

        match self.source.open() {
            Ok(rate) => {
                self.buffer.fill(0.0);
                self.sample_rate = Some(rate);
                log::info!(target: "detector", "Listening at {} Hz", rate);
                Ok(())
            }
            Err(e) => {
                self.source.close();
                log::error!(target: "detector", "Failed to start capture: {}", e);
                Err(e)
            }
        }
    }

    /// Releases the capture pipeline. Idempotent.
    pub fn stop(&mut self) {
        self.source.close();
        if self.sample_rate.take().is_some() {
            log::info!(target: "detector", "Stopped listening");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.sample_rate.is_some()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn config(&self) -> &PitchConfig {
        &self.config
    }

    /// Analyses the latest capture window.
    ///
    /// Returns `None` when not listening, when the window is below the
    /// silence gate, or when no periodic signal is found.
    pub fn detect(&mut self) -> Option<PitchResult> {
        let sample_rate = self.sample_rate?;

        self.source.read_latest(&mut self.buffer);
        let frequency =
            pitch::autocorrelate(&self.buffer, sample_rate, &self.config, &mut self.correlations)?;

        let result = PitchResult::from_frequency(frequency);
        log::trace!(
            target: "detector",
            "{} {:+.1} cents ({:.2} Hz)",
            result.note, result.cents_offset, result.frequency
        );
        Some(result)
    }
}

impl<S: CaptureSource> Drop for PitchDetector<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
