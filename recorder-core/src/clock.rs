//! # Audio Clock
//!
//! The transport schedules against a monotonic clock measured in seconds.
//! `FrameClock` advances with the frames an output stream has rendered, so
//! event timestamps line up with what is actually heard; `ManualClock` is set
//! explicitly and serves tests and offline hosts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub trait AudioClock {
    /// Current time in seconds. Never decreases.
    fn now(&self) -> f64;
}

/// Clock driven by the number of frames rendered by an audio callback.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Called from the audio callback after rendering `frames` frames.
    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Converts a clock time into an absolute frame index.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }
}

impl AudioClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Explicitly driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    // f64 bit pattern
    seconds: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock to `seconds`. Earlier times are ignored.
    pub fn set(&self, seconds: f64) {
        let current = self.now();
        if seconds > current {
            self.seconds.store(seconds.to_bits(), Ordering::Release);
        }
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.seconds.load(Ordering::Acquire))
    }
}

impl<C: AudioClock + ?Sized> AudioClock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_counts_rendered_frames() {
        let clock = FrameClock::new(48000);
        let shared = clock.clone();
        assert_eq!(clock.now(), 0.0);
        shared.advance(24000);
        assert_eq!(clock.now(), 0.5);
        assert_eq!(clock.frame_at(0.25), 12000);
    }

    #[test]
    fn manual_clock_is_monotonic_and_shared() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        handle.set(1.5);
        assert_eq!(clock.now(), 1.5);
        handle.set(1.0);
        assert_eq!(clock.now(), 1.5);
        clock.advance(0.25);
        assert_eq!(handle.now(), 1.75);
    }
}
