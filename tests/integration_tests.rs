//! Integration tests for the ABC interpreter and player
//!
//! Tests the full pipeline from ABC source to note events, and from the
//! control protocol through the scheduler to a recording backend.

use abcplay::client::PlayerClient;
use abcplay::control::{self, Command};
use abcplay::playback::{BackendEvent, PlaybackScheduler, RecordingBackend, SlotOptions};
use abcplay::{compile, AbcError, PlayerConfig};
use float_cmp::approx_eq;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DUET: &str = r#"X:1
T:Duet
C:Trad.
M:3/4
L:1/4
Q:1/4=1200
V:S name="Soprano" program=73
V:B clef=bass program=32
K:D
[V:S] d e f | a3 |]
[V:B] D,3 | A,,2 D, |]
"#;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn test_compile_two_voice_tune() {
    let tune = compile(DUET).expect("Duet should compile");
    assert_eq!(tune.title(), Some("Duet"));
    assert_eq!(tune.composer.as_deref(), Some("Trad."));
    assert_eq!(tune.voice_order, vec!["S".to_string(), "B".to_string()]);
    assert_eq!(tune.voice("S").unwrap().name.as_deref(), Some("Soprano"));
    assert_eq!(tune.voice("B").unwrap().instrument, Some(32));
    assert_eq!(tune.events.len(), 7);

    // K:D sharpens f; soprano before bass on shared starts
    let first: Vec<(u8, f64)> = tune.events[..2].iter().map(|e| (e.pitch, e.start)).collect();
    assert_eq!(first, vec![(74, 0.0), (50, 0.0)]);
    assert!(tune.events.iter().any(|e| e.pitch == 78));

    // Both voices end together after two bars of 3/4
    assert!(approx_eq!(f64, tune.duration_beats(), 6.0, ulps = 4));
    for pair in tune.events.windows(2) {
        assert!(pair[0].start <= pair[1].start);
    }
}

#[test]
fn test_compile_reports_every_error() {
    let source = "X:1\nL:1/4\nK:C\n(3ab\nA B\n[CE\n";
    match compile(source) {
        Err(AbcError::Diagnostics(errors)) => {
            let lines: Vec<Option<usize>> = errors.iter().map(AbcError::line).collect();
            assert_eq!(lines, vec![Some(4), Some(6)]);
            assert!(errors
                .iter()
                .all(|e| matches!(e, AbcError::Structural { .. })));
        }
        other => panic!("expected diagnostics, got {:?}", other.map(|t| t.events.len())),
    }
}

#[test]
fn test_repeats_with_endings() {
    let tune = compile("X:1\nL:1/4\nK:C\n|: C D |1 E :|2 F |]\n").unwrap();
    let pitches: Vec<u8> = tune.events.iter().map(|e| e.pitch).collect();
    assert_eq!(pitches, vec![60, 62, 64, 60, 62, 65]);
    let starts: Vec<f64> = tune.events.iter().map(|e| e.start).collect();
    assert_eq!(starts, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_part_sequence_playback_order() {
    let tune = compile("X:1\nP:ABA\nL:1/4\nK:C\nP:A\nC D\nP:B\nE F\n").unwrap();
    let pitches: Vec<u8> = tune.events.iter().map(|e| e.pitch).collect();
    assert_eq!(pitches, vec![60, 62, 64, 65, 60, 62]);
    assert_eq!(tune.events.last().map(|e| e.start), Some(5.0));
}

#[test]
fn test_triplet_in_compound_time() {
    // In 6/8 a bare (3 puts three notes in the time of two
    let tune = compile("X:1\nM:6/8\nL:1/8\nK:C\n(3CDE F\n").unwrap();
    let total: f64 = tune.events[..3].iter().map(|e| e.duration).sum();
    assert!(approx_eq!(f64, total, 1.0, ulps = 4));
    assert!(approx_eq!(f64, tune.events[3].start, 1.0, ulps = 4));
}

#[test]
fn test_scheduler_plays_whole_tune() {
    let backend = RecordingBackend::new();
    let scheduler = PlaybackScheduler::new(Box::new(backend.clone()), &PlayerConfig::default());
    let tune = compile(DUET).unwrap();
    let expected = tune.events.len();
    scheduler.enqueue(tune, SlotOptions::default()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let status = scheduler.status();
        !status.playing && status.queue_size == 0 && !backend.events().is_empty()
    }));

    let events = backend.events();
    let programs: Vec<BackendEvent> = events
        .iter()
        .copied()
        .filter(|e| matches!(e, BackendEvent::ProgramChange { .. }))
        .collect();
    assert_eq!(
        programs,
        vec![
            BackendEvent::ProgramChange {
                channel: 0,
                program: 73
            },
            BackendEvent::ProgramChange {
                channel: 1,
                program: 32
            },
        ]
    );
    let note_ons = events
        .iter()
        .filter(|e| matches!(e, BackendEvent::NoteOn { .. }))
        .count();
    assert_eq!(note_ons, expected);
    assert!(backend.sounding().is_empty());
    scheduler.shutdown();
}

#[test]
fn test_control_server_round_trip() {
    let backend = RecordingBackend::new();
    let scheduler = Arc::new(PlaybackScheduler::new(
        Box::new(backend.clone()),
        &PlayerConfig::default(),
    ));
    let addr = control::start_server("127.0.0.1:0", Arc::clone(&scheduler)).unwrap();
    let mut client = PlayerClient::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();

    let id = client
        .queue_abc("X:1\nT:Hold\nL:1\nQ:1/4=30\nK:C\n[CEG]\n", false)
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || backend.sounding().len() == 3));

    client.send(&Command::Pause).unwrap();
    let status = client.status().unwrap();
    assert!(status.contains(&"Paused: yes".to_string()), "{:?}", status);
    assert!(status.contains(&"Playing: no".to_string()), "{:?}", status);
    assert!(status.contains(&format!("Current: {} Hold", id)), "{:?}", status);

    let listed = client.send(&Command::List).unwrap();
    assert_eq!(listed, vec![format!("{}: Hold [playing]", id)]);

    client.send(&Command::Stop).unwrap();
    assert!(wait_until(Duration::from_millis(500), || backend.sounding().is_empty()));
    let status = client.status().unwrap();
    assert!(status.contains(&"Queue size: 0".to_string()));
    assert!(status.contains(&"Playing: no".to_string()));
}
