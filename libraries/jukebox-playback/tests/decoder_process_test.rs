//! Decoder session against real processes
//!
//! Uses `/bin/sh` scripts speaking the mplayer slave protocol as the decoder.
//! Most scripts only use shell builtins so closing stdin ends them promptly.
//! The `sleep` ones run an external child that keeps the output open after
//! the shell itself is gone.

#![cfg(unix)]

use crossbeam_channel::unbounded;
use jukebox_playback::{
    CoordinatorState, DecoderSession, DecoderSettings, DecoderState, PlaybackConfig,
    PlaybackCoordinator, PlaybackError, PlaybackEvent, QueueItem, SessionEventKind,
    SystemLauncher, TrackRef,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const PLAYS: &str = r#"
echo "MPlayer fake decoder"
echo "Playing $1."
echo "Starting playback..."
while read cmd; do
  case "$cmd" in
    get_time_length) echo "ANS_LENGTH=${TRACK_LEN:-30}.00" ;;
    get_time_pos) echo "ANS_TIME_POSITION=1.5" ;;
    finish) echo "Exiting... (End of file)"; exit 0 ;;
    quit) exit 0 ;;
  esac
done
"#;

const EXITS_EARLY: &str = r#"
echo "Playing $1."
echo "Exiting... (End of file)"
"#;

const HANGS: &str = r#"
while read cmd; do
  case "$cmd" in
    quit) exit 0 ;;
  esac
done
"#;

const OPENS_THEN_SLEEPS: &str = r#"
echo "Playing $1."
sleep 4
"#;

const PLAYS_THEN_SLEEPS: &str = r#"
echo "Playing $1."
echo "Starting playback..."
sleep 4
"#;

fn settings(script: &str) -> Arc<DecoderSettings> {
    Arc::new(DecoderSettings {
        program: PathBuf::from("/bin/sh"),
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "decoder".to_string(),
            "{file}".to_string(),
        ],
        ..Default::default()
    })
}

fn session(script: &str, timeout: Duration) -> DecoderSession {
    DecoderSession::new(settings(script), Arc::new(SystemLauncher), timeout).unwrap()
}

fn track() -> TrackRef {
    TrackRef::from_path("t1", "/music/song.ogg", Duration::from_secs(30))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn opens_and_reads_length() {
    let session = session(PLAYS, Duration::from_secs(10));
    let mut env = BTreeMap::new();
    env.insert("TRACK_LEN".to_string(), "42".to_string());

    session.open(&track(), 0.0, 0.5, env).unwrap();

    assert_eq!(session.state(), DecoderState::Playing);
    assert!(wait_until(|| session.duration() == Some(42.0)));

    session.send_command("get_time_pos").unwrap();
    assert!(wait_until(|| session.position() == Some(1.5)));

    session.stop();
    assert_eq!(session.state(), DecoderState::Stopped);
}

#[test]
fn end_marker_before_start_fails_with_premature_eof() {
    let session = session(EXITS_EARLY, Duration::from_secs(10));

    let err = session
        .open(&track(), 0.0, 0.5, BTreeMap::new())
        .unwrap_err();

    assert!(matches!(err, PlaybackError::PrematureEof(_)), "{:?}", err);
    assert_eq!(err.to_string(), "/music/song.ogg could not be read");
    assert_eq!(session.state(), DecoderState::Error);
}

#[test]
fn end_of_stream_while_playing_is_published() {
    let (tx, rx) = unbounded();
    let session = session(PLAYS, Duration::from_secs(10)).with_events(tx, 3);
    session.open(&track(), 0.0, 0.5, BTreeMap::new()).unwrap();

    session.send_command("finish").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let event = rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .expect("end of stream event");
        assert_eq!(event.generation, 3);
        if event.kind == SessionEventKind::EndOfStream {
            break;
        }
    }
    assert!(wait_until(|| session.state() == DecoderState::Eof));
}

#[test]
fn stop_during_opening_interrupts_quietly() {
    let (tx, rx) = unbounded();
    let session = Arc::new(session(HANGS, Duration::from_secs(30)).with_events(tx, 1));

    let opener = {
        let session = session.clone();
        thread::spawn(move || session.open(&track(), 0.0, 0.5, BTreeMap::new()))
    };
    assert!(wait_until(|| session.state() == DecoderState::Opening));
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    session.stop();
    let result = opener.join().unwrap();

    assert!(matches!(result, Err(PlaybackError::Interrupted)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(session.state(), DecoderState::Stopped);
    assert!(rx.try_recv().is_err());
}

#[test]
fn silent_decoder_hits_handshake_timeout() {
    let session = session(HANGS, Duration::from_millis(200));

    let err = session
        .open(&track(), 0.0, 0.5, BTreeMap::new())
        .unwrap_err();

    assert!(matches!(err, PlaybackError::HandshakeTimeout(_)));
    assert_eq!(session.state(), DecoderState::Error);
}

#[test]
fn missing_executable_is_a_spawn_failure() {
    let settings = Arc::new(DecoderSettings {
        program: PathBuf::from("/nonexistent/bin/mplayer"),
        ..Default::default()
    });
    let session = DecoderSession::new(settings, Arc::new(SystemLauncher), Duration::from_secs(1))
        .unwrap();

    let err = session
        .open(&track(), 0.0, 0.5, BTreeMap::new())
        .unwrap_err();

    match err {
        PlaybackError::ProcessSpawnFailure { program, .. } => {
            assert_eq!(program, "/nonexistent/bin/mplayer");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn stop_returns_while_a_child_holds_the_output() {
    let session = Arc::new(session(OPENS_THEN_SLEEPS, Duration::from_secs(30)));

    let opener = {
        let session = session.clone();
        thread::spawn(move || session.open(&track(), 0.0, 0.5, BTreeMap::new()))
    };
    assert!(wait_until(|| session.state() == DecoderState::Opening));
    thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    session.stop();
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());

    let result = opener.join().unwrap();
    assert!(matches!(result, Err(PlaybackError::Interrupted)));
    assert_eq!(session.state(), DecoderState::Stopped);
}

#[test]
fn coordinator_stop_does_not_wait_for_the_decoder() {
    let coordinator = PlaybackCoordinator::start(
        PlaybackConfig::default(),
        (*settings(PLAYS_THEN_SLEEPS)).clone(),
        Arc::new(SystemLauncher),
    )
    .unwrap();
    let track = TrackRef::from_url("s1", "http://jukebox.test/stream");
    coordinator
        .queue()
        .push(vec![QueueItem::new(Arc::new(track))], false);

    coordinator.play(None).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let event = coordinator
            .events()
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .expect("track start");
        if matches!(event, PlaybackEvent::TrackStarted { .. }) {
            break;
        }
    }

    let started = Instant::now();
    coordinator.stop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));

    assert!(wait_until(|| coordinator.state() == CoordinatorState::Stopped));
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert_eq!(coordinator.queue().history().len(), 1);
}
