//! # Sequence Transport
//!
//! Turns a step grid and a tempo into timestamped audio events and per-step
//! notifications, all placed on one audio clock.
//!
//! Positions are kept in ticks (`PPQ` per quarter note) on a [`Timeline`].
//! `pump()` does two passes:
//! 1. Every timeline action inside `now + lookahead` is resolved: sounds go to
//!    the [`NoteSink`] with their exact clock timestamp, notifications are
//!    queued with that same timestamp.
//! 2. Queued notifications whose timestamp has been reached are dispatched.
//!
//! A step callback therefore fires when the clock reaches the step, which is
//! the moment its note starts sounding, however early the sound was queued.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::clock::AudioClock;
use crate::scheduler::Timeline;
use crate::synth::{NoteSink, Sound};
use crate::tuning::NoteId;

/// Ticks per quarter note.
pub const PPQ: u64 = 192;
/// One step of the grid is an eighth note.
pub const STEP_TICKS: u64 = PPQ / 2;
/// Metronome clicks fall on quarter notes.
pub const CLICK_TICKS: u64 = PPQ;
/// Clicks last a thirty-second note.
const CLICK_LENGTH_TICKS: u64 = PPQ / 8;
/// Beats of count-in before the sequence when enabled.
pub const COUNT_IN_BEATS: u64 = 4;

const TICK_EPSILON: f64 = 1e-6;
const TIME_EPSILON: f64 = 1e-9;

// Ordering of actions that share a tick.
const PRIORITY_END: u8 = 0;
const PRIORITY_PASS: u8 = 1;
const PRIORITY_NOTE: u8 = 2;
const PRIORITY_STEP: u8 = 3;
const PRIORITY_CLICK: u8 = 4;

pub type StepCallback = Box<dyn FnMut(usize) + Send>;
pub type EndCallback = Box<dyn FnOnce() + Send>;

/// Flags for one playback run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackOptions {
    /// Repeat the grid until stopped. `on_end` never fires.
    pub looping: bool,
    /// Click on every quarter note while running.
    pub metronome: bool,
    /// Four clicks (first one accented) before the first step.
    pub count_in: bool,
}

/// Snapshot of the transport for hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportState {
    pub tempo_bpm: u32,
    pub is_looping: bool,
    pub metronome_enabled: bool,
    pub running: bool,
    /// `None` when not playing or before the first step has sounded.
    pub current_step_index: Option<usize>,
}

/// Whether a grid has anything to play. Hosts should not start an all-rest grid.
pub fn is_playable(steps: &[Option<NoteId>]) -> bool {
    steps.iter().any(Option::is_some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Note { step: usize },
    Step { step: usize },
    Click,
    CountIn { accent: bool },
    /// Start of the next pass of a looping sequence.
    Pass { start: u64 },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notification {
    Step(usize),
    End,
}

struct Session {
    steps: Vec<Option<NoteId>>,
    on_step: StepCallback,
    on_end: Option<EndCallback>,
}

/// Clock-driven step sequencer.
///
/// Only one sequence runs at a time: `start` always stops the previous one first.
pub struct SequenceTransport<C: AudioClock, S: NoteSink> {
    clock: C,
    sink: S,
    lookahead: f64,
    tempo_bpm: u32,
    anchor_time: f64,
    anchor_tick: f64,
    timeline: Timeline<Action>,
    notifications: VecDeque<(f64, Notification)>,
    session: Option<Session>,
    options: PlaybackOptions,
    current_step: Option<usize>,
}

impl<C: AudioClock, S: NoteSink> SequenceTransport<C, S> {
    /// Creates an idle transport at 120 BPM.
    ///
    /// # Arguments
    /// * `clock` - Audio clock all events are placed on
    /// * `sink` - Receiver of note and click sounds
    /// * `lookahead` - Seconds ahead of the clock that sounds are handed to the sink
    pub fn new(clock: C, sink: S, lookahead: f64) -> Self {
        Self {
            clock,
            sink,
            lookahead: lookahead.max(0.0),
            tempo_bpm: 120,
            anchor_time: 0.0,
            anchor_tick: 0.0,
            timeline: Timeline::new(),
            notifications: VecDeque::new(),
            session: None,
            options: PlaybackOptions::default(),
            current_step: None,
        }
    }

    /// Starts playing a snapshot of `steps` at `tempo_bpm`.
    ///
    /// Any running sequence is stopped first, so nothing scheduled by it can
    /// fire afterwards. `on_step` receives each step index as the clock reaches
    /// it, rests included. Without looping, `on_end` fires once after the last
    /// step's duration, after the transport has stopped itself.
    ///
    /// # Panics
    /// * If `tempo_bpm` is zero
    pub fn start<F, E>(
        &mut self,
        steps: &[Option<NoteId>],
        tempo_bpm: u32,
        on_step: F,
        on_end: E,
        options: PlaybackOptions,
    ) where
        F: FnMut(usize) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        assert!(tempo_bpm > 0, "tempo must be positive");
        self.stop();

        self.tempo_bpm = tempo_bpm;
        self.options = options;
        self.anchor_time = self.clock.now();
        self.anchor_tick = 0.0;

        let origin = if options.count_in {
            for beat in 0..COUNT_IN_BEATS {
                self.timeline
                    .schedule(beat * PPQ, PRIORITY_CLICK, Action::CountIn { accent: beat == 0 });
            }
            COUNT_IN_BEATS * PPQ
        } else {
            0
        };

        if options.metronome {
            self.timeline.schedule(origin, PRIORITY_CLICK, Action::Click);
        }

        schedule_pass(&mut self.timeline, steps.len(), origin, options.looping);
        if !options.looping {
            let end = origin + steps.len() as u64 * STEP_TICKS;
            self.timeline.schedule(end, PRIORITY_END, Action::End);
        }

        self.session = Some(Session {
            steps: steps.to_vec(),
            on_step: Box::new(on_step),
            on_end: Some(Box::new(on_end)),
        });

        log::info!(
            target: "transport",
            "Starting sequence: {} steps at {} BPM (loop: {}, metronome: {}, count-in: {})",
            steps.len(), tempo_bpm, options.looping, options.metronome, options.count_in
        );

        self.schedule_ahead();
    }

    /// Cancels every pending sound and notification and returns to idle.
    /// Idempotent.
    pub fn stop(&mut self) {
        let was_running = self.session.take().is_some();
        self.halt();
        if was_running {
            log::info!(target: "transport", "Sequence stopped");
        }
    }

    fn halt(&mut self) {
        self.timeline.clear();
        self.notifications.clear();
        self.sink.cancel_pending();
        self.session = None;
        self.current_step = None;
    }

    /// Changes the tempo from the current clock position onwards.
    ///
    /// Sounds already handed to the sink and notifications already queued keep
    /// their timestamps.
    ///
    /// # Panics
    /// * If `bpm` is zero
    pub fn set_tempo(&mut self, bpm: u32) {
        assert!(bpm > 0, "tempo must be positive");
        if self.session.is_some() {
            let now = self.clock.now();
            self.anchor_tick = self.tick_at(now);
            self.anchor_time = now;
        }
        log::debug!(target: "transport", "Tempo {} -> {} BPM", self.tempo_bpm, bpm);
        self.tempo_bpm = bpm;
    }

    /// Advances the transport to the clock's current time.
    ///
    /// Call this regularly (e.g. once per display frame). Callbacks run from
    /// inside this call.
    pub fn pump(&mut self) {
        self.schedule_ahead();

        let now = self.clock.now();
        while let Some(&(at, notification)) = self.notifications.front() {
            if at > now + TIME_EPSILON {
                break;
            }
            self.notifications.pop_front();

            match notification {
                Notification::Step(index) => {
                    self.current_step = Some(index);
                    if let Some(session) = self.session.as_mut() {
                        (session.on_step)(index);
                    }
                }
                Notification::End => {
                    let on_end = self.session.take().and_then(|s| s.on_end);
                    self.halt();
                    log::info!(target: "transport", "Sequence finished");
                    if let Some(on_end) = on_end {
                        on_end();
                    }
                    return;
                }
            }
        }
    }

    /// Plays a single note right away, whether or not a sequence is running.
    /// `duration` defaults to one step at the current tempo.
    pub fn preview_note(&mut self, note: &NoteId, duration: Option<f64>) {
        let duration = duration.unwrap_or_else(|| self.step_duration());
        let now = self.clock.now();
        self.sink.schedule(Sound::Preview { frequency: note.frequency(), duration }, now);
    }

    /// Length of one step (an eighth note) in seconds.
    pub fn step_duration(&self) -> f64 {
        self.ticks_to_secs(STEP_TICKS)
    }

    pub fn tempo(&self) -> u32 {
        self.tempo_bpm
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    pub fn state(&self) -> TransportState {
        TransportState {
            tempo_bpm: self.tempo_bpm,
            is_looping: self.options.looping,
            metronome_enabled: self.options.metronome,
            running: self.is_running(),
            current_step_index: self.current_step,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn ticks_to_secs(&self, ticks: u64) -> f64 {
        ticks as f64 * 60.0 / (self.tempo_bpm as f64 * PPQ as f64)
    }

    fn tick_at(&self, time: f64) -> f64 {
        self.anchor_tick + (time - self.anchor_time) * self.tempo_bpm as f64 / 60.0 * PPQ as f64
    }

    fn time_at(&self, tick: u64) -> f64 {
        self.anchor_time + (tick as f64 - self.anchor_tick) * 60.0 / (self.tempo_bpm as f64 * PPQ as f64)
    }

    /// Resolves every timeline action up to `now + lookahead`.
    fn schedule_ahead(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        let horizon = self.tick_at(self.clock.now() + self.lookahead) + TICK_EPSILON;
        if horizon < 0.0 {
            return;
        }
        let limit = horizon.floor() as u64;
        let step_secs = self.ticks_to_secs(STEP_TICKS);
        let click_secs = self.ticks_to_secs(CLICK_LENGTH_TICKS);
        let step_count = session.steps.len();

        while let Some((tick, action)) = self.timeline.pop_due(limit) {
            let at = self.time_at(tick);
            match action {
                Action::Note { step } => {
                    if let Some(Some(note)) = session.steps.get(step) {
                        self.sink
                            .schedule(Sound::Note { frequency: note.frequency(), duration: step_secs }, at);
                    }
                }
                Action::Step { step } => {
                    self.notifications.push_back((at, Notification::Step(step)));
                }
                Action::Click => {
                    self.sink.schedule(Sound::Click { accent: false, duration: click_secs }, at);
                    self.timeline.schedule(tick + CLICK_TICKS, PRIORITY_CLICK, Action::Click);
                }
                Action::CountIn { accent } => {
                    self.sink.schedule(Sound::Click { accent, duration: click_secs }, at);
                }
                Action::Pass { start } => {
                    log::trace!(target: "transport", "Loop pass at tick {}", start);
                    schedule_pass(&mut self.timeline, step_count, start, true);
                }
                Action::End => {
                    self.notifications.push_back((at, Notification::End));
                    // Nothing belongs to the sequence past its end.
                    self.timeline.clear();
                    break;
                }
            }
        }
    }
}

/// Queues one pass of the grid starting at `start`, plus the next pass when looping.
fn schedule_pass(timeline: &mut Timeline<Action>, step_count: usize, start: u64, looping: bool) {
    for step in 0..step_count {
        let tick = start + step as u64 * STEP_TICKS;
        timeline.schedule(tick, PRIORITY_NOTE, Action::Note { step });
        timeline.schedule(tick, PRIORITY_STEP, Action::Step { step });
    }
    if looping && step_count > 0 {
        let next = start + step_count as u64 * STEP_TICKS;
        timeline.schedule(next, PRIORITY_PASS, Action::Pass { start: next });
    }
}

impl<C: AudioClock, S: NoteSink> Drop for SequenceTransport<C, S> {
    fn drop(&mut self) {
        self.halt();
    }
}
