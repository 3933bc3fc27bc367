//! # Error Types
//!
//! Errors surfaced by the capture pipeline and the engine configuration.
//! A detector returning `None` is not an error; it is the normal
//! "no confident pitch this cycle" signal.

use thiserror::Error;

/// Failure to bring up the microphone capture pipeline.
///
/// Both variants are terminal for the requested `start()`; nothing is retried
/// and no partial capture state is left behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user or the platform refused microphone access.
    #[error("microphone access denied: {0}")]
    Permission(String),

    /// No usable input device, or the stream could not be built or started.
    #[error("audio capture device error: {0}")]
    Device(String),
}

impl CaptureError {
    pub fn is_permission(&self) -> bool {
        matches!(self, CaptureError::Permission(_))
    }
}

/// Failure to bring up the playback stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("audio output device error: {0}")]
    Device(String),
}

/// Failure to load or validate an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Error returned when a string is not a valid note identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid note identifier: {0:?}")]
pub struct ParseNoteError(pub String);
