use recorder_core::synth::RecordingSink;
use recorder_core::{AudioClock, ManualClock, NoteId, PlaybackOptions, SequenceTransport, parse_grid};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Step(&'static str, usize),
    End(&'static str),
}

type Log = Arc<Mutex<Vec<Event>>>;
type Transport = SequenceTransport<ManualClock, RecordingSink<ManualClock>>;

fn setup(lookahead: f64) -> (ManualClock, RecordingSink<ManualClock>, Transport) {
    let clock = ManualClock::new();
    let sink = RecordingSink::new(clock.clone());
    let transport = SequenceTransport::new(clock.clone(), sink.clone(), lookahead);
    (clock, sink, transport)
}

fn start(transport: &mut Transport, log: &Log, tag: &'static str, steps: &[Option<NoteId>], options: PlaybackOptions) {
    let step_log = Arc::clone(log);
    let end_log = Arc::clone(log);
    transport.start(
        steps,
        120,
        move |i| step_log.lock().unwrap().push(Event::Step(tag, i)),
        move || end_log.lock().unwrap().push(Event::End(tag)),
        options,
    );
}

/// Advances the clock in small increments, pumping after each one.
fn run_until(clock: &ManualClock, transport: &mut Transport, until: f64) {
    transport.pump();
    while clock.now() < until {
        clock.advance(0.01);
        transport.pump();
    }
}

fn events(log: &Log) -> Vec<Event> {
    log.lock().unwrap().clone()
}

#[test]
fn one_shot_sequence_fires_each_step_then_ends_once() {
    let (clock, sink, mut transport) = setup(0.0);
    let log = Log::default();
    let steps = parse_grid("C5,-,D5,-").unwrap();

    start(&mut transport, &log, "a", &steps, PlaybackOptions::default());
    run_until(&clock, &mut transport, 3.0);

    assert_eq!(
        events(&log),
        vec![
            Event::Step("a", 0),
            Event::Step("a", 1),
            Event::Step("a", 2),
            Event::Step("a", 3),
            Event::End("a"),
        ]
    );
    assert_eq!(sink.note_starts(), vec![0.0, 0.5]);
    assert!(!transport.is_running());
    assert_eq!(transport.state().current_step_index, None);
}

#[test]
fn step_callbacks_fire_on_their_clock_time() {
    let (clock, _, mut transport) = setup(0.0);
    let log = Log::default();
    let steps = parse_grid("C5,-,D5,-").unwrap();
    start(&mut transport, &log, "a", &steps, PlaybackOptions::default());

    let checkpoints = [(0.0, 1), (0.24, 1), (0.25, 2), (0.74, 3), (0.75, 4), (0.99, 4), (1.0, 5)];
    for (time, expected) in checkpoints {
        clock.set(time);
        transport.pump();
        assert_eq!(events(&log).len(), expected, "at {time}s");
    }
    assert_eq!(events(&log).last(), Some(&Event::End("a")));
}

#[test]
fn late_pump_dispatches_everything_in_order() {
    let (clock, _, mut transport) = setup(0.0);
    let log = Log::default();
    let steps = parse_grid("C5,D5,E5").unwrap();
    start(&mut transport, &log, "a", &steps, PlaybackOptions::default());

    clock.set(10.0);
    transport.pump();
    transport.pump();
    assert_eq!(
        events(&log),
        vec![Event::Step("a", 0), Event::Step("a", 1), Event::Step("a", 2), Event::End("a")]
    );
}

#[test]
fn looping_repeats_until_stopped_and_never_ends() {
    let (clock, sink, mut transport) = setup(0.0);
    let log = Log::default();
    let steps = parse_grid("C5,-,D5,-").unwrap();
    let options = PlaybackOptions { looping: true, ..Default::default() };

    start(&mut transport, &log, "a", &steps, options);
    run_until(&clock, &mut transport, 2.9);
    transport.stop();

    let indices: Vec<usize> = events(&log)
        .into_iter()
        .map(|e| match e {
            Event::Step(_, i) => i,
            Event::End(_) => panic!("looping sequence must not end"),
        })
        .collect();
    assert_eq!(indices.len(), 12);
    for (n, index) in indices.iter().enumerate() {
        assert_eq!(*index, n % 4);
    }
    assert_eq!(sink.note_starts(), vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);

    run_until(&clock, &mut transport, 5.0);
    assert_eq!(events(&log).len(), 12);
    assert!(!transport.state().running);
}

#[test]
fn restart_cancels_the_previous_sequence() {
    let (clock, sink, mut transport) = setup(0.0);
    let log = Log::default();
    let first = parse_grid("C5,D5,E5,F5").unwrap();
    let second = parse_grid("G5,A5").unwrap();

    start(&mut transport, &log, "a", &first, PlaybackOptions::default());
    run_until(&clock, &mut transport, 0.3);
    start(&mut transport, &log, "b", &second, PlaybackOptions::default());
    run_until(&clock, &mut transport, 3.0);

    assert_eq!(
        events(&log),
        vec![
            Event::Step("a", 0),
            Event::Step("a", 1),
            Event::Step("b", 0),
            Event::Step("b", 1),
            Event::End("b"),
        ]
    );
    let restart = sink.note_starts()[2];
    assert!(restart > 0.29 && restart < 0.32, "second sequence starts at restart time, got {restart}");
    assert_eq!(sink.note_starts().len(), 4);
}

#[test]
fn running_sequence_ignores_later_grid_edits() {
    let (clock, sink, mut transport) = setup(0.0);
    let log = Log::default();
    let mut steps = parse_grid("C5,D5,-,E5").unwrap();

    start(&mut transport, &log, "a", &steps, PlaybackOptions::default());
    steps[0] = None;
    steps[2] = "G5".parse().ok();
    steps.clear();
    run_until(&clock, &mut transport, 3.0);

    assert_eq!(sink.note_starts(), vec![0.0, 0.25, 0.75]);
    assert_eq!(
        events(&log),
        vec![
            Event::Step("a", 0),
            Event::Step("a", 1),
            Event::Step("a", 2),
            Event::Step("a", 3),
            Event::End("a"),
        ]
    );
}

#[test]
fn metronome_clicks_on_quarter_notes_until_stop() {
    let (clock, sink, mut transport) = setup(0.0);
    let log = Log::default();
    let rests = parse_grid("-,-,-").unwrap();
    let options = PlaybackOptions { looping: true, metronome: true, ..Default::default() };

    start(&mut transport, &log, "a", &rests, options);
    run_until(&clock, &mut transport, 2.2);
    transport.stop();
    run_until(&clock, &mut transport, 4.0);

    // Two steps per click, independent of the three-step pattern.
    assert_eq!(sink.click_starts(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    assert!(sink.note_starts().is_empty());
}

#[test]
fn metronome_stops_with_a_finished_sequence() {
    let (clock, sink, mut transport) = setup(0.0);
    let log = Log::default();
    let steps = parse_grid("C5,D5,E5,F5").unwrap();
    let options = PlaybackOptions { metronome: true, ..Default::default() };

    start(&mut transport, &log, "a", &steps, options);
    run_until(&clock, &mut transport, 3.0);

    assert_eq!(sink.click_starts(), vec![0.0, 0.5]);
    assert_eq!(events(&log).last(), Some(&Event::End("a")));
}

#[test]
fn lookahead_queues_sounds_early_but_notifies_on_time() {
    let (clock, sink, mut transport) = setup(0.1);
    let log = Log::default();
    let steps = parse_grid("C5,D5,E5,F5").unwrap();
    start(&mut transport, &log, "a", &steps, PlaybackOptions::default());

    clock.set(0.2);
    transport.pump();
    assert_eq!(sink.note_starts(), vec![0.0, 0.25]);
    assert_eq!(events(&log), vec![Event::Step("a", 0)]);
    assert_eq!(transport.current_step(), Some(0));

    transport.stop();
    assert_eq!(sink.note_starts(), vec![0.0], "queued note must be cancelled");

    run_until(&clock, &mut transport, 2.0);
    assert_eq!(events(&log), vec![Event::Step("a", 0)]);
}

#[test]
fn stop_is_idempotent_and_leaves_idle_state() {
    let (_, _, mut transport) = setup(0.0);
    transport.stop();
    transport.stop();
    let state = transport.state();
    assert!(!state.running);
    assert_eq!(state.current_step_index, None);
    assert_eq!(state.tempo_bpm, 120);
}
