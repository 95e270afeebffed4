//! End-to-end tests for PlaybackCoordinator
//!
//! Drives the coordinator against scripted decoders covering:
//! - Queue advance on end of stream
//! - Stop while a decoder is still opening
//! - Failure fallback and the consecutive-failure guard
//! - Decoder output failing mid-track
//! - Skip, play-now, pause/resume, volume
//! - Continue, intro and fade-out modes
//! - Shutdown reaping the decoder

use crossbeam_channel::Receiver;
use jukebox_playback::test_utils::{wait_until, DecoderBehavior, ScriptedLauncher};
use jukebox_playback::{
    Catalog, CoordinatorState, DecoderSettings, ErrorCode, IntroConfig, ObfuscatedSecret,
    PlaybackConfig, PlaybackCoordinator, PlaybackEvent, ProxySettings, QueueItem, TrackRef,
};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

// ============================================================================
// Test Infrastructure
// ============================================================================

const TIMEOUT: Duration = Duration::from_secs(10);

fn track(id: &str, secs: u64) -> Arc<TrackRef> {
    Arc::new(TrackRef {
        duration: Duration::from_secs(secs),
        ..TrackRef::from_url(id, format!("http://jukebox.test/{}.mp3", id))
    })
}

fn item(id: &str, secs: u64) -> QueueItem {
    QueueItem::new(track(id, secs))
}

fn config() -> PlaybackConfig {
    PlaybackConfig {
        handshake_timeout_secs: 5,
        position_interval_ms: 20,
        ..Default::default()
    }
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("jukebox_playback=debug")
            .with_test_writer()
            .try_init();
    });
}

fn start(config: PlaybackConfig, launcher: &ScriptedLauncher) -> PlaybackCoordinator {
    init_tracing();
    PlaybackCoordinator::start(config, DecoderSettings::default(), Arc::new(launcher.clone()))
        .expect("coordinator starts")
}

/// Events other than queue and position chatter
fn significant(event: &PlaybackEvent) -> bool {
    !matches!(
        event,
        PlaybackEvent::QueueChanged { .. } | PlaybackEvent::PositionUpdated { .. }
    )
}

/// Collect significant events up to and including the first that matches
fn wait_for(
    events: &Receiver<PlaybackEvent>,
    mut matches: impl FnMut(&PlaybackEvent) -> bool,
) -> Vec<PlaybackEvent> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                if !significant(&event) {
                    continue;
                }
                let done = matches(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(_) => panic!("timed out waiting for event; saw {:#?}", seen),
        }
    }
}

fn started(id: &str) -> impl FnMut(&PlaybackEvent) -> bool + '_ {
    move |event| matches!(event, PlaybackEvent::TrackStarted { track_id, .. } if track_id == id)
}

fn error_code(event: &PlaybackEvent) -> Option<ErrorCode> {
    match event {
        PlaybackEvent::PlaybackError { code, .. } => Some(*code),
        _ => None,
    }
}

/// Significant events arriving within `window`
fn drain(events: &Receiver<PlaybackEvent>, window: Duration) -> Vec<PlaybackEvent> {
    let deadline = Instant::now() + window;
    let mut seen = Vec::new();
    while let Ok(event) = events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        if significant(&event) {
            seen.push(event);
        }
    }
    seen
}

fn ids(items: &[QueueItem]) -> Vec<String> {
    items.iter().map(|i| i.track.id.clone()).collect()
}

// ============================================================================
// Queue advance
// ============================================================================

#[test]
fn plays_queue_to_the_end_then_stops() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 40)], false);
    coordinator.play(None).unwrap();

    wait_for(events, started("A"));
    assert_eq!(coordinator.state(), CoordinatorState::Playing);
    assert_eq!(coordinator.queue().current().unwrap().track.id, "A");

    assert!(launcher.finish_current());
    let seen = wait_for(events, started("B"));
    assert!(seen
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackEnded { track_id, .. } if track_id == "A")));
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);

    assert!(launcher.finish_current());
    let seen = wait_for(events, |e| *e == PlaybackEvent::PlaybackEnded);
    assert!(seen
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackEnded { track_id, .. } if track_id == "B")));
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);

    let later = drain(events, Duration::from_millis(200));
    assert!(!later
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackStarted { .. })));
    assert_eq!(ids(&coordinator.queue().history()), vec!["B", "A"]);
    assert_eq!(launcher.launch_count(), 2);
    assert_eq!(launcher.live_processes(), 0);
}

#[test]
fn play_with_empty_queue_reports_it() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);

    coordinator.play(None).unwrap();

    let seen = wait_for(coordinator.events(), |e| error_code(e).is_some());
    assert_eq!(error_code(seen.last().unwrap()), Some(ErrorCode::QueueEmpty));
    assert_eq!(launcher.launch_count(), 0);
}

#[test]
fn repeat_all_loops_the_queue() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(
        PlaybackConfig {
            repeat_all: true,
            ..config()
        },
        &launcher,
    );
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();

    wait_for(events, started("A"));
    launcher.finish_current();
    wait_for(events, started("B"));
    launcher.finish_current();
    wait_for(events, started("A"));

    assert!(coordinator.queue().history().is_empty());
    assert_eq!(ids(&coordinator.queue().pending()), vec!["B"]);
}

// ============================================================================
// Stop and interruption
// ============================================================================

#[test]
fn stop_while_opening_is_silent_and_reaps_the_decoder() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Hangs);
    let coordinator = start(
        PlaybackConfig {
            handshake_timeout_secs: 30,
            ..config()
        },
        &launcher,
    );
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();
    assert!(launcher.wait_for_launches(1, TIMEOUT));

    let stopped_at = Instant::now();
    coordinator.stop().unwrap();
    let seen = wait_for(events, |e| {
        *e == PlaybackEvent::StateChanged {
            state: CoordinatorState::Stopped,
        }
    });
    assert!(stopped_at.elapsed() < Duration::from_secs(5));

    let later = drain(events, Duration::from_millis(200));
    assert!(
        seen.iter().chain(&later).all(|e| error_code(e).is_none()),
        "unexpected error notification: {:#?}",
        seen
    );
    assert_eq!(launcher.live_processes(), 0);
    assert_eq!(launcher.launch_count(), 1);

    // Interrupted item goes back to the head of the queue
    assert!(coordinator.queue().current().is_none());
    assert_eq!(ids(&coordinator.queue().pending()), vec!["A", "B"]);
}

#[test]
fn stop_while_playing_finishes_current_item() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    coordinator.stop().unwrap();
    let seen = wait_for(events, |e| {
        *e == PlaybackEvent::StateChanged {
            state: CoordinatorState::Stopped,
        }
    });

    assert!(seen
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackEnded { track_id, .. } if track_id == "A")));
    assert_eq!(launcher.live_processes(), 0);
    assert_eq!(launcher.commands().last().map(String::as_str), Some("quit"));
    assert!(coordinator.queue().current().is_none());
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);
    assert_eq!(ids(&coordinator.queue().pending()), vec!["B"]);

    // Playing again carries on with the next item
    coordinator.play(None).unwrap();
    wait_for(events, started("B"));
}

#[test]
fn stop_returns_without_waiting_for_the_decoder() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Hangs);
    let coordinator = start(
        PlaybackConfig {
            handshake_timeout_secs: 30,
            ..config()
        },
        &launcher,
    );

    coordinator.queue().push(vec![item("A", 30)], false);
    coordinator.play(None).unwrap();
    assert!(launcher.wait_for_launches(1, TIMEOUT));

    let commands_before = launcher.commands().len();
    let begun = Instant::now();
    coordinator.stop().unwrap();
    assert!(begun.elapsed() < Duration::from_millis(100));

    // Only the worker writes to the decoder
    assert!(wait_until(TIMEOUT, || launcher.live_processes() == 0));
    let commands = launcher.commands();
    assert_eq!(commands.len(), commands_before + 1);
    assert_eq!(commands.last().map(String::as_str), Some("quit"));
}

#[test]
fn shutdown_reaps_the_decoder() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);

    coordinator.queue().push(vec![item("A", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(coordinator.events(), started("A"));

    coordinator.shutdown();
    coordinator.shutdown();

    assert_eq!(launcher.live_processes(), 0);
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    assert!(coordinator.play(None).is_err());
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn unreadable_track_is_reported_and_skipped() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays)
        .behavior_for("A.mp3", DecoderBehavior::ExitsBeforeStart);
    let coordinator = start(config(), &launcher);

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();

    let seen = wait_for(coordinator.events(), started("B"));
    let errors: Vec<_> = seen.iter().filter_map(error_code).collect();
    assert_eq!(errors, vec![ErrorCode::UnreadableTrack]);
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);
    assert_eq!(launcher.live_processes(), 1);
}

#[test]
fn consecutive_failures_give_up() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::FailsToSpawn);
    let coordinator = start(
        PlaybackConfig {
            max_consecutive_failures: 2,
            ..config()
        },
        &launcher,
    );

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30), item("C", 30)], false);
    coordinator.play(None).unwrap();

    let seen = wait_for(coordinator.events(), |e| {
        error_code(e) == Some(ErrorCode::NothingPlayable)
    });
    let errors: Vec<_> = seen.iter().filter_map(error_code).collect();
    assert_eq!(
        errors,
        vec![
            ErrorCode::SpawnFailure,
            ErrorCode::SpawnFailure,
            ErrorCode::NothingPlayable
        ]
    );
    assert!(!seen
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackStarted { .. })));

    assert!(wait_until(TIMEOUT, || coordinator.state()
        == CoordinatorState::Stopped));
    assert_eq!(launcher.launch_count(), 2);
    assert_eq!(ids(&coordinator.queue().pending()), vec!["C"]);
}

#[test]
fn handshake_timeout_falls_back_to_next_track() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays)
        .behavior_for("A.mp3", DecoderBehavior::Hangs);
    let coordinator = start(
        PlaybackConfig {
            handshake_timeout_secs: 1,
            ..config()
        },
        &launcher,
    );

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();

    let seen = wait_for(coordinator.events(), started("B"));
    let errors: Vec<_> = seen.iter().filter_map(error_code).collect();
    assert_eq!(errors, vec![ErrorCode::HandshakeTimeout]);
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);
    assert_eq!(launcher.live_processes(), 1);
}

#[test]
fn output_failure_mid_track_moves_on() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    assert!(launcher.break_output());
    let seen = wait_for(events, started("B"));

    let errors: Vec<_> = seen.iter().filter_map(error_code).collect();
    assert_eq!(errors, vec![ErrorCode::ProtocolIo]);
    assert!(seen
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackEnded { track_id, .. } if track_id == "A")));
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);
    assert_eq!(launcher.live_processes(), 1);
}

#[test]
fn settings_failure_stops_without_consuming_the_queue() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let settings = DecoderSettings {
        proxy: ProxySettings {
            enabled: true,
            login: "u".to_string(),
            password: ObfuscatedSecret::from_stored("not base64!"),
            ..Default::default()
        },
        ..Default::default()
    };
    let coordinator =
        PlaybackCoordinator::start(config(), settings, Arc::new(launcher.clone())).unwrap();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();

    let seen = wait_for(coordinator.events(), |e| error_code(e).is_some());
    assert_eq!(error_code(seen.last().unwrap()), Some(ErrorCode::Configuration));
    assert!(wait_until(TIMEOUT, || coordinator.state()
        == CoordinatorState::Stopped));

    let later = drain(coordinator.events(), Duration::from_millis(200));
    assert!(later.iter().all(|e| error_code(e).is_none()));
    assert_eq!(launcher.launch_count(), 0);
    assert!(coordinator.queue().history().is_empty());
    assert_eq!(ids(&coordinator.queue().pending()), vec!["A", "B"]);
}

#[test]
fn missing_file_is_skipped_without_launching() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let missing = QueueItem::new(Arc::new(TrackRef::from_path(
        "gone",
        "/nonexistent/unmounted/gone.mp3",
        Duration::from_secs(30),
    )));

    coordinator
        .queue()
        .push(vec![missing, item("B", 30)], false);
    coordinator.play(None).unwrap();

    let seen = wait_for(coordinator.events(), started("B"));
    let errors: Vec<_> = seen.iter().filter_map(error_code).collect();
    assert_eq!(errors, vec![ErrorCode::TrackUnavailable]);
    assert_eq!(launcher.launch_count(), 1);
}

// ============================================================================
// User commands
// ============================================================================

#[test]
fn skip_moves_to_next_track() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    coordinator.skip().unwrap();
    let seen = wait_for(events, started("B"));

    assert!(seen
        .iter()
        .any(|e| matches!(e, PlaybackEvent::TrackEnded { track_id, .. } if track_id == "A")));
    assert!(seen.iter().all(|e| error_code(e).is_none()));
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);
    assert_eq!(launcher.live_processes(), 1);
}

#[test]
fn play_now_jumps_ahead_of_the_queue() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 30), item("B", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    coordinator.play(Some(vec![item("NOW", 30)])).unwrap();
    wait_for(events, started("NOW"));

    assert_eq!(ids(&coordinator.queue().pending()), vec!["B"]);
    assert_eq!(ids(&coordinator.queue().history()), vec!["A"]);
}

#[test]
fn pause_and_resume_map_to_protocol_commands() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(config(), &launcher);
    let events = coordinator.events();

    coordinator.queue().push(vec![item("A", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    coordinator.pause().unwrap();
    wait_for(events, |e| {
        *e == PlaybackEvent::StateChanged {
            state: CoordinatorState::Paused,
        }
    });
    coordinator.resume().unwrap();
    wait_for(events, |e| {
        *e == PlaybackEvent::StateChanged {
            state: CoordinatorState::Playing,
        }
    });

    let pauses = launcher
        .commands()
        .iter()
        .filter(|c| c.as_str() == "pause")
        .count();
    assert_eq!(pauses, 2);
    assert!(coordinator.queue().current().is_some());
}

#[test]
fn volume_and_seek_reach_the_decoder() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(
        PlaybackConfig {
            volume: 0.8,
            ..config()
        },
        &launcher,
    );

    coordinator.queue().push(vec![item("A", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(coordinator.events(), started("A"));

    coordinator.set_volume(0.3).unwrap();
    coordinator.seek(0.5).unwrap();

    assert!(wait_until(TIMEOUT, || {
        let commands = launcher.commands();
        commands.iter().any(|c| c == "volume 30 1") && commands.iter().any(|c| c == "seek 50 1")
    }));
    let commands = launcher.commands();
    assert_eq!(commands[0], "get_time_length");
    assert_eq!(commands[1], "volume 80 1");
}

#[test]
fn position_updates_are_published() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    launcher.set_position(12.5);
    let coordinator = start(config(), &launcher);

    coordinator.queue().push(vec![item("A", 30)], false);
    coordinator.play(None).unwrap();

    let deadline = Instant::now() + TIMEOUT;
    loop {
        let event = coordinator
            .events()
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .expect("position update");
        if let PlaybackEvent::PositionUpdated {
            position_secs,
            duration_secs,
        } = event
        {
            assert_eq!(position_secs, 12.5);
            assert_eq!(duration_secs, Some(30.0));
            break;
        }
    }
}

// ============================================================================
// Supplementary modes
// ============================================================================

struct Album(Vec<Arc<TrackRef>>);

impl Catalog for Album {
    fn next_after(&self, track: &TrackRef) -> Option<Arc<TrackRef>> {
        let index = self.0.iter().position(|t| t.id == track.id)?;
        self.0.get(index + 1).cloned()
    }
}

#[test]
fn continue_mode_follows_the_catalog() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let album = Album(vec![track("A", 30), track("B", 30)]);
    let coordinator = PlaybackCoordinator::start_with_catalog(
        PlaybackConfig {
            continue_mode: true,
            ..config()
        },
        DecoderSettings::default(),
        Arc::new(launcher.clone()),
        Arc::new(album),
    )
    .unwrap();
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![QueueItem::new(track("A", 30))], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    launcher.finish_current();
    wait_for(events, started("B"));

    launcher.finish_current();
    wait_for(events, |e| *e == PlaybackEvent::PlaybackEnded);
}

#[test]
fn intro_mode_plays_an_excerpt() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    let coordinator = start(
        PlaybackConfig {
            intro: IntroConfig {
                enabled: true,
                begin_percent: 50,
                length_secs: 5,
            },
            ..config()
        },
        &launcher,
    );
    let events = coordinator.events();

    coordinator
        .queue()
        .push(vec![item("A", 100), item("B", 100)], false);
    coordinator.play(None).unwrap();
    wait_for(events, started("A"));

    // Started at 50s; excerpt ends at 55s
    assert!(launcher.launches()[0].args.contains(&"50.0".to_string()));
    launcher.set_position(56.0);
    wait_for(events, started("B"));
}

#[test]
fn fade_out_lowers_volume_near_the_end() {
    let launcher = ScriptedLauncher::new(DecoderBehavior::Plays);
    launcher.set_length(30.0);
    launcher.set_position(25.0);
    let coordinator = start(
        PlaybackConfig {
            volume: 0.5,
            fade_duration_secs: 10,
            ..config()
        },
        &launcher,
    );

    coordinator.queue().push(vec![item("A", 30)], false);
    coordinator.play(None).unwrap();
    wait_for(coordinator.events(), started("A"));

    // 5s left of a 10s fade: half of 50%
    assert!(wait_until(TIMEOUT, || launcher
        .commands()
        .iter()
        .any(|c| c == "volume 25 1")));
}
