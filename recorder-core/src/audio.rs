//! # Audio Capture Module
//!
//! This module handles real-time microphone capture using CPAL (Cross-Platform Audio Library).
//! It provides the capture seam used by the pitch detector, the CPAL-backed
//! implementation of that seam, and the ring buffer that connects the audio
//! callback to the analysis side.
//!
//! ## Features
//! - Automatic audio device selection
//! - Mono f32 preferred, other formats and channel counts converted on the fly
//! - Lock-free-on-the-audio-thread handoff (`try_lock`, never blocks the callback)
//! - Permission and device failures reported as distinct errors

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedStreamConfigRange};
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use crate::error::CaptureError;

/// Audio buffer size for analysis windows.
///
/// Larger windows resolve lower pitches but increase latency.
pub const BUFFER_SIZE: usize = 2048;

/// Sample rate requested from the input device when it supports it.
pub const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// A live source of microphone samples.
///
/// `read_latest` must never block waiting for new audio: it copies whatever
/// was most recently captured.
pub trait CaptureSource {
    /// Opens the capture pipeline and returns its sample rate in Hz.
    fn open(&mut self) -> Result<u32, CaptureError>;

    /// Copies the most recent `out.len()` samples into `out`, oldest first.
    /// Positions with no captured audio yet are zero-filled.
    fn read_latest(&mut self, out: &mut [f32]);

    /// Releases the pipeline. Safe to call when nothing is open.
    fn close(&mut self);
}

/// Fixed-capacity ring that always holds the most recent samples.
#[derive(Debug, Clone)]
pub struct SampleRing {
    data: Vec<f32>,
    write_pos: usize,
    filled: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            write_pos: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn push(&mut self, sample: f32) {
        self.data[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.data.len();
        self.filled = (self.filled + 1).min(self.data.len());
    }

    pub fn write(&mut self, samples: &[f32]) {
        for &s in samples {
            self.push(s);
        }
    }

    /// Copies the newest `out.len()` samples into `out`, oldest first,
    /// zero-filling the front when fewer samples are available.
    pub fn copy_latest(&self, out: &mut [f32]) {
        let cap = self.data.len();
        let wanted = out.len();
        let available = self.filled.min(wanted).min(cap);
        let missing = wanted - available;

        out[..missing].fill(0.0);

        let start = (self.write_pos + cap - available) % cap;
        for (i, slot) in out[missing..].iter_mut().enumerate() {
            *slot = self.data[(start + i) % cap];
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.write_pos = 0;
        self.filled = 0;
    }
}

/// Microphone capture through the default CPAL input device.
pub struct CpalCapture {
    ring: Arc<Mutex<SampleRing>>,
    stream: Option<cpal::Stream>,
}

impl CpalCapture {
    /// Creates a capture source whose ring holds `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(SampleRing::new(capacity))),
            stream: None,
        }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new(BUFFER_SIZE)
    }
}

impl CaptureSource for CpalCapture {
    /// Starts audio capture from the default input device.
    ///
    /// This function:
    /// 1. Selects the default audio input device
    /// 2. Picks a mono f32 configuration near 44.1 kHz, or the device default
    /// 3. Installs a callback that feeds the shared sample ring
    fn open(&mut self) -> Result<u32, CaptureError> {
        if self.stream.is_some() {
            return Err(CaptureError::Device("capture stream already open".into()));
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::Device("No input device available".into()))?;

        match device.name() {
            Ok(name) => log::info!(target: "audio", "Using audio input device: {}", name),
            Err(e) => log::warn!(target: "audio", "Input device has no readable name: {}", e),
        }

        let configs = device
            .supported_input_configs()
            .map_err(|e| classify("query input configs", e))?
            .collect::<Vec<_>>();

        let (config, sample_format) =
            match find_supported_config(configs, PREFERRED_SAMPLE_RATE) {
                Some(range) => {
                    let supported = range.with_sample_rate(clamped_rate(&range, PREFERRED_SAMPLE_RATE));
                    (supported.config(), supported.sample_format())
                }
                None => {
                    let supported = device
                        .default_input_config()
                        .map_err(|e| classify("query default input config", e))?;
                    (supported.config(), supported.sample_format())
                }
            };

        let sample_rate = config.sample_rate.0;
        log::info!(
            target: "audio",
            "Selected input config: {} Hz, {} channel(s), {:?}",
            sample_rate, config.channels, sample_format
        );

        self.ring
            .lock()
            .map_err(|_| CaptureError::Device("sample ring poisoned".into()))?
            .clear();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, Arc::clone(&self.ring)),
            cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, Arc::clone(&self.ring)),
            cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, Arc::clone(&self.ring)),
            cpal::SampleFormat::I32 => build_input::<i32>(&device, &config, Arc::clone(&self.ring)),
            other => Err(CaptureError::Device(format!("unsupported sample format {other:?}"))),
        }?;

        stream.play().map_err(|e| classify("start input stream", e))?;
        self.stream = Some(stream);

        Ok(sample_rate)
    }

    fn read_latest(&mut self, out: &mut [f32]) {
        // If the callback is mid-write, keep the previous window instead of waiting.
        if let Ok(ring) = self.ring.try_lock() {
            ring.copy_latest(out);
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!(target: "audio", "Error pausing input stream: {}", e);
            }
            drop(stream);
            log::info!(target: "audio", "Input stream closed");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<Mutex<SampleRing>>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let err_fn = |err| log::error!(target: "audio", "An error occurred on the input stream: {}", err);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Never block the audio thread; a dropped block only delays the next window.
                if let Ok(mut ring) = ring.try_lock() {
                    for frame in data.chunks(channels) {
                        let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                        ring.push(sum / frame.len() as f32);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| classify("build input stream", e))
}

/// Maps a CPAL failure onto the capture error taxonomy.
///
/// CPAL has no dedicated permission error; backends report access denial
/// through their own messages.
fn classify(context: &str, err: impl Display) -> CaptureError {
    let message = format!("{context}: {err}");
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not authorized", "not permitted"]
        .iter()
        .any(|needle| lower.contains(needle));
    if denied {
        CaptureError::Permission(message)
    } else {
        CaptureError::Device(message)
    }
}

fn clamped_rate(range: &SupportedStreamConfigRange, target: u32) -> cpal::SampleRate {
    cpal::SampleRate(target.clamp(range.min_sample_rate().0, range.max_sample_rate().0))
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Selects a mono, 32-bit float configuration whose rate range lies closest
/// to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.channels() == 1 && c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            if (min..=max).contains(&target_rate) {
                0
            } else {
                (min as i64 - target_rate as i64).abs().min((max as i64 - target_rate as i64).abs())
            }
        })
}
