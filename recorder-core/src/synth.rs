//! # Synth Output Module
//!
//! The audio side of the transport. Sounds are handed over ahead of time with
//! an exact clock timestamp and start on that frame, independent of when the
//! scheduling call ran.
//!
//! ## Features
//! - Sine guide-melody voices with an attack/decay/sustain/release envelope
//! - Square-wave metronome and count-in clicks (accented or regular)
//! - Master volume in dB (at or below -30 dB is silence) and guide-melody mute
//! - Cancellation of everything not yet started
//! - `RecordingSink` for tests and offline hosts

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};

use crate::clock::{AudioClock, FrameClock};
use crate::error::OutputError;

/// Master volume at or below this level mutes the output.
pub const MUTE_THRESHOLD_DB: f32 = -30.0;

const MELODY_VOLUME_DB: f32 = -4.0;
const CLICK_VOLUME_DB: f32 = -10.0;
const ACCENT_CLICK_HZ: f32 = 1046.50; // C6
const REGULAR_CLICK_HZ: f32 = 523.25; // C5

/// Something the transport asks the audio side to play.
#[derive(Debug, Clone, PartialEq)]
pub enum Sound {
    /// A guide-melody note. Silenced by the melody mute.
    Note { frequency: f32, duration: f64 },
    /// A single note requested by the host (e.g. tapping a fingering).
    Preview { frequency: f32, duration: f64 },
    /// Metronome or count-in click.
    Click { accent: bool, duration: f64 },
}

/// Receiver of timestamped sounds.
pub trait NoteSink {
    /// Queues `sound` to start at clock time `start` (seconds).
    fn schedule(&mut self, sound: Sound, start: f64);

    /// Drops every queued sound that has not started yet.
    fn cancel_pending(&mut self);
}

/// Converts decibels to a linear gain.
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[derive(Debug, Clone, Copy)]
struct Envelope {
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
}

const MELODY_ENVELOPE: Envelope = Envelope { attack: 0.04, decay: 0.2, sustain: 0.5, release: 1.2 };
const CLICK_ENVELOPE: Envelope = Envelope { attack: 0.001, decay: 0.1, sustain: 0.0, release: 0.1 };

impl Envelope {
    fn held_level(&self, t: f32) -> f32 {
        if t < self.attack {
            t / self.attack
        } else if t < self.attack + self.decay {
            1.0 - (1.0 - self.sustain) * (t - self.attack) / self.decay
        } else {
            self.sustain
        }
    }

    /// Level `t` seconds after note-on for a note held `hold` seconds.
    /// `None` once the release has finished.
    fn level(&self, t: f32, hold: f32) -> Option<f32> {
        if t < hold {
            return Some(self.held_level(t));
        }
        let since_release = t - hold;
        if since_release >= self.release {
            return None;
        }
        Some(self.held_level(hold) * (1.0 - since_release / self.release))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceKind {
    Melody,
    Preview,
    Click,
}

#[derive(Debug, Clone)]
struct Voice {
    kind: VoiceKind,
    frequency: f32,
    hold: f32,
    gain: f32,
    envelope: Envelope,
    start_frame: u64,
    phase: f32,
}

impl Voice {
    fn from_sound(sound: Sound, start_frame: u64) -> Self {
        match sound {
            Sound::Note { frequency, duration } => Voice {
                kind: VoiceKind::Melody,
                frequency,
                hold: duration as f32,
                gain: db_to_gain(MELODY_VOLUME_DB),
                envelope: MELODY_ENVELOPE,
                start_frame,
                phase: 0.0,
            },
            Sound::Preview { frequency, duration } => Voice {
                kind: VoiceKind::Preview,
                frequency,
                hold: duration as f32,
                gain: db_to_gain(MELODY_VOLUME_DB),
                envelope: MELODY_ENVELOPE,
                start_frame,
                phase: 0.0,
            },
            Sound::Click { accent, duration } => Voice {
                kind: VoiceKind::Click,
                frequency: if accent { ACCENT_CLICK_HZ } else { REGULAR_CLICK_HZ },
                hold: duration as f32,
                gain: db_to_gain(CLICK_VOLUME_DB),
                envelope: CLICK_ENVELOPE,
                start_frame,
                phase: 0.0,
            },
        }
    }

    fn oscillator(&self) -> f32 {
        match self.kind {
            VoiceKind::Click => {
                if self.phase < 0.5 { 1.0 } else { -1.0 }
            }
            _ => (self.phase * 2.0 * PI).sin(),
        }
    }
}

/// Mixer state shared between the audio callback and the scheduling side.
#[derive(Debug)]
pub struct SynthState {
    sample_rate: u32,
    pending: Vec<Voice>,
    active: Vec<Voice>,
    master_gain: f32,
    melody_muted: bool,
}

impl SynthState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            pending: Vec::new(),
            active: Vec::new(),
            master_gain: 1.0,
            melody_muted: false,
        }
    }

    fn queue(&mut self, sound: Sound, start_frame: u64) {
        self.pending.push(Voice::from_sound(sound, start_frame));
    }

    fn cancel_pending(&mut self) {
        self.pending.clear();
    }

    pub fn set_master_volume(&mut self, db: f32) {
        self.master_gain = if db <= MUTE_THRESHOLD_DB { 0.0 } else { db_to_gain(db) };
    }

    pub fn set_melody_mute(&mut self, muted: bool) {
        self.melody_muted = muted;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Renders interleaved output whose first frame is `first_frame`.
    pub fn render(&mut self, out: &mut [f32], channels: usize, first_frame: u64) {
        let channels = channels.max(1);
        let rate = self.sample_rate as f32;

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let now = first_frame + i as u64;

            let mut k = 0;
            while k < self.pending.len() {
                if self.pending[k].start_frame <= now {
                    let voice = self.pending.swap_remove(k);
                    self.active.push(voice);
                } else {
                    k += 1;
                }
            }

            let mut mix = 0.0;
            let melody_muted = self.melody_muted;
            self.active.retain_mut(|voice| {
                let t = now.saturating_sub(voice.start_frame) as f32 / rate;
                let Some(level) = voice.envelope.level(t, voice.hold) else {
                    return false;
                };
                if !(melody_muted && voice.kind == VoiceKind::Melody) {
                    mix += voice.oscillator() * level * voice.gain;
                }
                voice.phase = (voice.phase + voice.frequency / rate).fract();
                true
            });

            let sample = (mix * self.master_gain).clamp(-1.0, 1.0);
            frame.fill(sample);
        }
    }
}

/// Cloneable scheduling handle onto a running [`SynthOutput`].
#[derive(Debug, Clone)]
pub struct SynthHandle {
    state: Arc<Mutex<SynthState>>,
    clock: FrameClock,
}

impl SynthHandle {
    pub fn new(state: Arc<Mutex<SynthState>>, clock: FrameClock) -> Self {
        Self { state, clock }
    }

    pub fn set_master_volume(&self, db: f32) {
        if let Ok(mut state) = self.state.lock() {
            state.set_master_volume(db);
        }
    }

    pub fn set_melody_mute(&self, muted: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.set_melody_mute(muted);
        }
    }
}

impl NoteSink for SynthHandle {
    fn schedule(&mut self, sound: Sound, start: f64) {
        let frame = self.clock.frame_at(start);
        if let Ok(mut state) = self.state.lock() {
            state.queue(sound, frame);
        }
    }

    fn cancel_pending(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.cancel_pending();
        }
    }
}

/// Playback through the default CPAL output device.
///
/// The stream's callback drives a [`FrameClock`], which is the audio clock the
/// transport should schedule against.
pub struct SynthOutput {
    _stream: cpal::Stream,
    handle: SynthHandle,
}

impl SynthOutput {
    pub fn open() -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| OutputError::Device("No output device available".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| OutputError::Device(format!("query output config: {e}")))?;

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(OutputError::Device(format!(
                "unsupported output sample format {:?}",
                supported.sample_format()
            )));
        }

        let config: cpal::StreamConfig = supported.config();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels as usize;
        log::info!(target: "synth", "Output stream: {} Hz, {} channel(s)", sample_rate, channels);

        let clock = FrameClock::new(sample_rate);
        let state = Arc::new(Mutex::new(SynthState::new(sample_rate)));

        let render_state = Arc::clone(&state);
        let render_clock = clock.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_buffer(&render_state, &render_clock, data, channels);
                },
                |err| log::error!(target: "synth", "Audio output stream error: {}", err),
                None,
            )
            .map_err(|e| OutputError::Device(format!("build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| OutputError::Device(format!("start output stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            handle: SynthHandle::new(state, clock),
        })
    }

    pub fn handle(&self) -> SynthHandle {
        self.handle.clone()
    }

    pub fn clock(&self) -> FrameClock {
        self.handle.clock.clone()
    }
}

/// Output callback body: renders one interleaved buffer and advances the clock.
///
/// Never blocks the audio thread; a contended lock costs one silent buffer.
fn render_buffer(state: &Mutex<SynthState>, clock: &FrameClock, data: &mut [f32], channels: usize) {
    match state.try_lock() {
        Ok(mut state) => state.render(data, channels, clock.frames()),
        Err(_) => data.fill(0.0),
    }
    clock.advance((data.len() / channels.max(1)) as u64);
}

/// A sound accepted by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSound {
    pub start: f64,
    pub sound: Sound,
}

/// Sink that keeps a log of what it was asked to play.
///
/// `cancel_pending` removes entries whose start lies after the clock's
/// current time, mirroring a real synth dropping queued voices.
#[derive(Debug, Clone)]
pub struct RecordingSink<C: AudioClock> {
    log: Arc<Mutex<Vec<ScheduledSound>>>,
    clock: C,
}

impl<C: AudioClock> RecordingSink<C> {
    pub fn new(clock: C) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            clock,
        }
    }

    /// Everything scheduled and not cancelled, in scheduling order.
    pub fn sounds(&self) -> Vec<ScheduledSound> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn note_starts(&self) -> Vec<f64> {
        self.sounds()
            .into_iter()
            .filter(|s| matches!(s.sound, Sound::Note { .. }))
            .map(|s| s.start)
            .collect()
    }

    pub fn click_starts(&self) -> Vec<f64> {
        self.sounds()
            .into_iter()
            .filter(|s| matches!(s.sound, Sound::Click { .. }))
            .map(|s| s.start)
            .collect()
    }
}

impl<C: AudioClock> NoteSink for RecordingSink<C> {
    fn schedule(&mut self, sound: Sound, start: f64) {
        if let Ok(mut log) = self.log.lock() {
            log.push(ScheduledSound { start, sound });
        }
    }

    fn cancel_pending(&mut self) {
        let now = self.clock.now();
        if let Ok(mut log) = self.log.lock() {
            log.retain(|s| s.start <= now);
        }
    }
}
