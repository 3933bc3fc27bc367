//! # Recorder Host
//!
//! Terminal front-end for the recorder trainer core.
//!
//! ## Architecture
//! - **Main Thread**: argument handling, transport pumping, printing
//! - **Detector Thread**: owns the microphone and polls `detect()` at ~60 Hz
//! - **Communication**: Crossbeam channels for results and shutdown

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender};
use recorder_core::{
    CaptureError, EngineConfig, NoteId, PitchDetector, PitchResult, PlaybackOptions,
    SequenceTransport, Step, SynthOutput, TunerStatus, is_playable, parse_grid, tuner_status,
};
use recorder_core::tuning::SCALE_ORDER;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Display refresh interval used for polling.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

const USAGE: &str = "\
usage: recorder-host [--config FILE] [--verbose] <command>

commands:
  tune    [--target NOTE] [--seconds N]
  play    GRID [--bpm N] [--loop] [--metronome] [--count-in]
               [--volume DB] [--mute-melody] [--seconds N]
  preview NOTE

GRID is comma separated, '-' or '.' marks a rest: C5,-,D5,E5
GRID may also be `scale` for the instrument's scale";

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let config = match flag_value(&args, "--config") {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => EngineConfig::default(),
    };

    let positional = positional_args(&args);
    match positional.first().map(String::as_str) {
        Some("tune") => run_tuner(&args, &config),
        Some("play") => {
            let grid = positional.get(1).ok_or_else(|| anyhow!("play needs a GRID\n\n{USAGE}"))?;
            run_sequence(grid, &args, &config)
        }
        Some("preview") => {
            let note = positional.get(1).ok_or_else(|| anyhow!("preview needs a NOTE\n\n{USAGE}"))?;
            run_preview(note, &config)
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn flag_set(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

/// Arguments that are neither flags nor values of flags.
fn positional_args(args: &[String]) -> Vec<String> {
    const VALUE_FLAGS: [&str; 5] = ["--config", "--target", "--seconds", "--bpm", "--volume"];
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
        } else if !arg.starts_with('-') || arg == "-" {
            out.push(arg.clone());
        }
    }
    out
}

fn seconds_arg(args: &[String], default: f64) -> Result<Duration> {
    let seconds = match flag_value(args, "--seconds") {
        Some(s) => s.parse::<f64>().with_context(|| format!("invalid --seconds {s:?}"))?,
        None => default,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("--seconds must be a non-negative number");
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Detector thread management structure.
struct DetectorWorker {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DetectorWorker {
    /// Spawns the polling thread and waits until the microphone is open.
    ///
    /// The detector is created on the worker itself because capture streams
    /// are not guaranteed to be movable between threads.
    fn spawn(config: &EngineConfig, results_tx: Sender<Option<PitchResult>>) -> Result<Self, CaptureError> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);
        let pitch_config = config.pitch.clone();

        let thread_handle = thread::spawn(move || {
            log::debug!(target: "host", "Detector thread starting");
            let mut detector = PitchDetector::default_input(pitch_config);
            if let Err(e) = detector.start() {
                let _ = ready_tx.send(Err(e));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            let ticker = crossbeam_channel::tick(FRAME_INTERVAL);
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => {
                        if results_tx.send(detector.detect()).is_err() {
                            log::debug!(target: "host", "Result channel closed");
                            break;
                        }
                    },
                    recv(shutdown_rx) -> _ => {
                        log::debug!(target: "host", "Detector thread received shutdown signal");
                        break;
                    },
                }
            }
            detector.stop();
            log::debug!(target: "host", "Detector thread finished");
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown_tx,
                thread_handle: Some(thread_handle),
            }),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => Err(CaptureError::Device("detector thread exited during start".into())),
        }
    }

    fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!(target: "host", "Detector thread panicked");
            }
        }
    }
}

fn run_tuner(args: &[String], config: &EngineConfig) -> Result<()> {
    let target: Option<NoteId> = flag_value(args, "--target")
        .map(str::parse)
        .transpose()
        .context("invalid --target")?;
    let duration = seconds_arg(args, 10.0)?;

    let (results_tx, results_rx) = crossbeam_channel::unbounded();
    let worker = match DetectorWorker::spawn(config, results_tx) {
        Ok(worker) => worker,
        Err(e) if e.is_permission() => {
            bail!("{e}\nAllow microphone access for this terminal and try again.")
        }
        Err(e) => return Err(e.into()),
    };

    println!("Listening for {:.0} s...", duration.as_secs_f64());
    print_readings(&results_rx, target.as_ref(), duration);
    worker.shutdown();
    Ok(())
}

fn print_readings(results_rx: &Receiver<Option<PitchResult>>, target: Option<&NoteId>, duration: Duration) {
    let deadline = Instant::now() + duration;
    let mut last_status: Option<TunerStatus> = None;

    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let Ok(reading) = results_rx.recv_timeout(remaining) else {
            break;
        };
        let status = tuner_status(true, reading.as_ref(), target);
        if last_status.as_ref() == Some(&status) {
            continue;
        }
        match &reading {
            Some(r) => println!(
                "{:<4} {:+6.1} cents {:8.2} Hz  {}",
                r.note.as_str(), r.cents_offset, r.frequency, describe(&status)
            ),
            None => println!("{}", describe(&status)),
        }
        last_status = Some(status);
    }
}

fn describe(status: &TunerStatus) -> String {
    match status {
        TunerStatus::Waiting => "waiting...".to_string(),
        TunerStatus::Neutral { note } => note.to_string(),
        TunerStatus::Perfect => "Perfect!".to_string(),
        TunerStatus::Good => "Good".to_string(),
        TunerStatus::Off { sharp: true } => "too high".to_string(),
        TunerStatus::Off { sharp: false } => "too low".to_string(),
        TunerStatus::Wrong { detected } => format!("playing {detected}"),
    }
}

#[derive(Debug)]
enum PlaybackEvent {
    Step(usize),
    End,
}

fn run_sequence(grid: &str, args: &[String], config: &EngineConfig) -> Result<()> {
    let steps = if grid == "scale" { scale_grid(config) } else { parse_grid(grid)? };
    if !is_playable(&steps) {
        bail!("the grid has no notes to play");
    }

    let bpm = match flag_value(args, "--bpm") {
        Some(s) => s.parse::<u32>().with_context(|| format!("invalid --bpm {s:?}"))?,
        None => config.default_bpm,
    };
    let bpm = config.clamp_bpm(bpm);
    let options = PlaybackOptions {
        looping: flag_set(args, "--loop"),
        metronome: flag_set(args, "--metronome"),
        count_in: flag_set(args, "--count-in") || config.count_in,
    };
    let limit = seconds_arg(args, if options.looping { 8.0 } else { 600.0 })?;

    let output = SynthOutput::open()?;
    let synth = output.handle();
    let volume = match flag_value(args, "--volume") {
        Some(s) => s.parse::<f32>().with_context(|| format!("invalid --volume {s:?}"))?,
        None => config.default_volume_db,
    };
    synth.set_master_volume(config.clamp_volume(volume));
    synth.set_melody_mute(flag_set(args, "--mute-melody"));

    let mut transport = SequenceTransport::new(output.clock(), synth, config.lookahead_secs);
    let (events_tx, events_rx) = crossbeam_channel::unbounded();
    let end_tx = events_tx.clone();

    let labels: Vec<String> = steps
        .iter()
        .map(|s| s.as_ref().map_or_else(|| "-".to_string(), |n| n.to_string()))
        .collect();

    transport.start(
        &steps,
        bpm,
        move |index| {
            let _ = events_tx.send(PlaybackEvent::Step(index));
        },
        move || {
            let _ = end_tx.send(PlaybackEvent::End);
        },
        options,
    );

    let deadline = Instant::now() + limit;
    'playback: while Instant::now() < deadline {
        transport.pump();
        for event in events_rx.try_iter() {
            match event {
                PlaybackEvent::Step(index) => println!("step {:>3}  {}", index, labels[index]),
                PlaybackEvent::End => {
                    println!("end");
                    break 'playback;
                }
            }
        }
        thread::sleep(FRAME_INTERVAL);
    }

    transport.stop();
    // Let the release tail ring out.
    thread::sleep(Duration::from_millis(500));
    Ok(())
}

/// The playable scale, padded with rests to the configured grid length.
fn scale_grid(config: &EngineConfig) -> Vec<Step> {
    let mut steps: Vec<Step> = SCALE_ORDER
        .iter()
        .map(|name| name.parse::<NoteId>().ok())
        .collect();
    if steps.len() < config.initial_steps {
        steps.resize(config.initial_steps, None);
    }
    steps
}

fn run_preview(note: &str, config: &EngineConfig) -> Result<()> {
    let note: NoteId = note.parse()?;
    let output = SynthOutput::open()?;
    let synth = output.handle();
    synth.set_master_volume(config.default_volume_db);

    let mut transport = SequenceTransport::new(output.clock(), synth, config.lookahead_secs);
    transport.set_tempo(config.default_bpm);
    transport.preview_note(&note, None);
    println!("{} ({:.2} Hz)", note, note.frequency());
    thread::sleep(Duration::from_millis(1500));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn positional_args_skip_flag_values() {
        let a = args(&["--config", "c.json", "play", "C5,-,D5", "--bpm", "90", "--loop"]);
        assert_eq!(positional_args(&a), vec!["play".to_string(), "C5,-,D5".to_string()]);
        assert_eq!(flag_value(&a, "--bpm"), Some("90"));
        assert!(flag_set(&a, "--loop"));
        assert!(!flag_set(&a, "--metronome"));
    }

    #[test]
    fn seconds_must_be_non_negative() {
        assert!(seconds_arg(&args(&["--seconds", "-1"]), 1.0).is_err());
        assert_eq!(seconds_arg(&args(&[]), 2.5).unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn scale_grid_pads_to_configured_length() {
        let steps = scale_grid(&EngineConfig::default());
        assert_eq!(steps.len(), 16);
        assert_eq!(steps[0].as_ref().map(NoteId::as_str), Some("C5"));
        assert_eq!(steps[8].as_ref().map(NoteId::as_str), Some("D6"));
        assert!(steps[9..].iter().all(Option::is_none));
    }

    #[test]
    fn status_descriptions() {
        assert_eq!(describe(&TunerStatus::Off { sharp: true }), "too high");
        assert_eq!(
            describe(&TunerStatus::Wrong { detected: "E5".parse().unwrap() }),
            "playing E5"
        );
    }
}
