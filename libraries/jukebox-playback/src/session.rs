//! Decoder session
//!
//! Owns exactly one external decoder process for its lifetime and speaks the
//! line protocol with it. The process is always reaped before the session is
//! dropped.
//!
//! ```text
//! Idle -> Opening -> Playing -> Stopped | Eof | Error
//! ```
//!
//! All methods take `&self` so a session shared through `Arc` can be
//! interrupted from another thread while `open` is still waiting on the
//! handshake. [`DecoderSession::interrupt`] never touches the pipes; the
//! process is torn down by whichever thread calls `stop` or is blocked in
//! `open`.

use crossbeam_channel::Sender;
use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{PlaybackError, Result};
use crate::launch::{DecoderProcess, LaunchSpec, ProcessLauncher};
use crate::protocol::{DecoderCommand, ResponseRules};
use crate::reader::ResponseReader;
use crate::settings::DecoderSettings;
use crate::types::{DecoderState, TrackRef};

/// Time allowed for the decoder to exit on its own after `quit`
const STOP_GRACE: Duration = Duration::from_millis(300);
const STOP_POLL: Duration = Duration::from_millis(10);
/// Time allowed for the reader to see the pipe close once the process is reaped
const READER_GRACE: Duration = Duration::from_millis(200);

/// Event published by the response reader
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Identifies the session that produced the event
    pub generation: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Started,
    Position(f64),
    Length(f64),
    EndOfStream,
    /// Read failure outside of a deliberate stop
    Failed(String),
}

#[derive(Debug)]
pub(crate) struct SessionStatus {
    pub(crate) state: DecoderState,
    pub(crate) opening: bool,
    pub(crate) eof: bool,
    pub(crate) stop_requested: bool,
    pub(crate) reader_done: bool,
    pub(crate) failure: Option<io::Error>,
    pub(crate) position: Option<f64>,
    pub(crate) duration: Option<f64>,
}

/// Status shared between the session and its reader thread
pub(crate) struct SessionShared {
    status: Mutex<SessionStatus>,
    pub(crate) changed: Condvar,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            status: Mutex::new(SessionStatus {
                state: DecoderState::Idle,
                opening: false,
                eof: false,
                stop_requested: false,
                reader_done: false,
                failure: None,
                position: None,
                duration: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One decoder process and its text-command protocol
pub struct DecoderSession {
    settings: Arc<DecoderSettings>,
    rules: ResponseRules,
    launcher: Arc<dyn ProcessLauncher>,
    shared: Arc<SessionShared>,

    // Single writer: every command goes through this lock
    process: Mutex<Option<Box<dyn DecoderProcess>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Held for a whole teardown so concurrent stops both wait for the reap
    teardown: Mutex<()>,

    events: Option<Sender<SessionEvent>>,
    generation: u64,
    handshake_timeout: Duration,
}

impl DecoderSession {
    /// Create an idle session
    pub fn new(
        settings: Arc<DecoderSettings>,
        launcher: Arc<dyn ProcessLauncher>,
        handshake_timeout: Duration,
    ) -> Result<Self> {
        let rules = ResponseRules::compile(&settings.protocol)?;
        Ok(Self {
            settings,
            rules,
            launcher,
            shared: Arc::new(SessionShared::new()),
            process: Mutex::new(None),
            reader: Mutex::new(None),
            teardown: Mutex::new(()),
            events: None,
            generation: 0,
            handshake_timeout,
        })
    }

    /// Publish reader events on `events`, tagged with `generation`
    pub fn with_events(mut self, events: Sender<SessionEvent>, generation: u64) -> Self {
        self.events = Some(events);
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> DecoderState {
        self.shared.lock().state
    }

    /// Last reported position in seconds
    pub fn position(&self) -> Option<f64> {
        self.shared.lock().position
    }

    /// Track length reported by the decoder, in seconds
    pub fn duration(&self) -> Option<f64> {
        self.shared.lock().duration
    }

    /// Launch the decoder for `track` and wait for playback to start
    ///
    /// Blocks for at most the handshake timeout. On success the decoder has
    /// been asked for the track length and set to `volume`.
    pub fn open(
        &self,
        track: &TrackRef,
        start_fraction: f32,
        volume: f32,
        env: BTreeMap<String, String>,
    ) -> Result<()> {
        let start_secs = track.duration.as_secs_f64() * f64::from(start_fraction.clamp(0.0, 1.0));
        let spec = LaunchSpec::build(&self.settings, track, start_secs, env);
        debug!("Using decoder command: {}", spec.command_line());

        {
            let mut status = self.shared.lock();
            if status.stop_requested {
                return Err(PlaybackError::Interrupted);
            }
            if status.state != DecoderState::Idle {
                return Err(PlaybackError::InvalidOperation(
                    "decoder session already opened".to_string(),
                ));
            }
            status.state = DecoderState::Opening;
            status.opening = true;
            status.eof = false;
        }

        let mut process = match self.launcher.launch(&spec) {
            Ok(process) => process,
            Err(source) => {
                self.shared.lock().state = DecoderState::Error;
                return Err(PlaybackError::ProcessSpawnFailure {
                    program: spec.program.to_string_lossy().into_owned(),
                    source,
                });
            }
        };
        debug!("Decoder started (pid {:?})", process.id());

        let Some(output) = process.take_stdout() else {
            *self.process_slot() = Some(process);
            return Err(self.fail(PlaybackError::ProtocolIo(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "decoder output not captured",
            ))));
        };
        *self.process_slot() = Some(process);

        let reader = ResponseReader {
            rules: self.rules.clone(),
            shared: self.shared.clone(),
            events: self.events.clone(),
            generation: self.generation,
        };
        match reader.spawn(output) {
            Ok(handle) => *self.reader_slot() = Some(handle),
            Err(e) => return Err(self.fail(PlaybackError::ProtocolIo(e))),
        }

        self.await_handshake(track)?;

        let protocol = &self.settings.protocol;
        self.send_command(&DecoderCommand::QueryLength.render(protocol))
            .and_then(|()| self.send_command(&DecoderCommand::Volume(volume).render(protocol)))
            .map_err(|e| self.fail(e))?;

        let mut status = self.shared.lock();
        if status.stop_requested {
            drop(status);
            self.teardown();
            return Err(PlaybackError::Interrupted);
        }
        if status.state == DecoderState::Opening {
            // End marker may already have arrived while the replies were sent
            status.state = if status.eof {
                DecoderState::Eof
            } else {
                DecoderState::Playing
            };
        }
        info!("Playing {}", track.location.as_argument());
        Ok(())
    }

    /// Wait until the decoder leaves the opening phase
    fn await_handshake(&self, track: &TrackRef) -> Result<()> {
        let status = self.shared.lock();
        let (mut status, timeout) = self
            .shared
            .changed
            .wait_timeout_while(status, self.handshake_timeout, |s| {
                s.opening && !s.stop_requested
            })
            .unwrap_or_else(PoisonError::into_inner);

        if status.stop_requested {
            drop(status);
            self.teardown();
            return Err(PlaybackError::Interrupted);
        }

        let outcome = if status.eof {
            Err(PlaybackError::PrematureEof(track.location.as_argument()))
        } else if let Some(err) = status.failure.take() {
            Err(PlaybackError::ProtocolIo(err))
        } else if timeout.timed_out() && status.opening {
            Err(PlaybackError::HandshakeTimeout(self.handshake_timeout))
        } else {
            Ok(())
        };
        drop(status);

        outcome.map_err(|e| self.fail(e))
    }

    /// Mark the session failed and release the process
    fn fail(&self, err: PlaybackError) -> PlaybackError {
        warn!("Decoder session failed: {}", err);
        self.teardown();
        self.shared.lock().state = DecoderState::Error;
        err
    }

    /// Write one command line to the decoder
    pub fn send_command(&self, line: &str) -> Result<()> {
        let mut slot = self.process_slot();
        let process = slot.as_mut().ok_or_else(|| {
            PlaybackError::ProtocolIo(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "decoder is not running",
            ))
        })?;
        debug!("Decoder command: {}", line);
        process.write_line(line).map_err(PlaybackError::ProtocolIo)
    }

    /// Render and send a protocol command
    pub fn send(&self, command: DecoderCommand) -> Result<()> {
        self.send_command(&command.render(&self.settings.protocol))
    }

    fn send_when_playing(&self, command: DecoderCommand) -> Result<()> {
        if self.state() != DecoderState::Playing {
            return Err(PlaybackError::SessionNotPlaying);
        }
        self.send(command)
    }

    /// Seek to a fraction of the track; ignored unless playing
    pub fn seek(&self, fraction: f32) {
        if let Err(e) = self.send_when_playing(DecoderCommand::Seek(fraction)) {
            debug!("Seek ignored: {}", e);
        }
    }

    /// Set volume (0.0-1.0); ignored unless playing
    pub fn set_volume(&self, level: f32) {
        if let Err(e) = self.send_when_playing(DecoderCommand::Volume(level)) {
            debug!("Volume change ignored: {}", e);
        }
    }

    pub fn pause(&self) -> Result<()> {
        self.send_when_playing(DecoderCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send_when_playing(DecoderCommand::Resume)
    }

    /// Flag the session as stopped without touching the process
    ///
    /// Returns immediately. A pending `open` wakes up, tears the process down
    /// on its own thread and returns `Interrupted`; the reader publishes
    /// nothing further.
    pub fn interrupt(&self) {
        {
            let mut status = self.shared.lock();
            status.stop_requested = true;
            if matches!(
                status.state,
                DecoderState::Idle | DecoderState::Opening | DecoderState::Playing
            ) {
                status.state = DecoderState::Stopped;
            }
        }
        self.shared.changed.notify_all();
    }

    /// Stop the decoder and release its process
    ///
    /// Safe to call in any state, from any thread, any number of times. A
    /// session that is still opening makes `open` return `Interrupted`.
    pub fn stop(&self) {
        self.interrupt();
        self.teardown();
    }

    /// Quit or kill the process, reap it and join the reader
    fn teardown(&self) {
        let _serial = self.teardown.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.lock().stop_requested = true;
        self.shared.changed.notify_all();

        let process = self.process_slot().take();
        if let Some(mut process) = process {
            let quit = DecoderCommand::Quit.render(&self.settings.protocol);
            if let Err(e) = process.write_line(&quit) {
                debug!("Decoder did not take quit command: {}", e);
            }

            let deadline = Instant::now() + STOP_GRACE;
            let mut exited = false;
            while Instant::now() < deadline {
                match process.try_wait() {
                    Ok(true) => {
                        exited = true;
                        break;
                    }
                    Ok(false) => thread::sleep(STOP_POLL),
                    Err(e) => {
                        debug!("Cannot poll decoder exit: {}", e);
                        break;
                    }
                }
            }
            if !exited {
                if let Err(e) = process.kill() {
                    warn!("Failed to kill decoder: {}", e);
                }
            }
            if let Err(e) = process.wait() {
                warn!("Failed to reap decoder: {}", e);
            }
        }

        let reader = self.reader_slot().take();
        if let Some(reader) = reader {
            self.release_reader(reader);
        }
    }

    /// Join the reader once the reaped process's pipe has closed
    ///
    /// A child the decoder forked may still hold the output open. The reader
    /// is flagged as stopped and publishes nothing more, so it is left to end
    /// with that pipe.
    fn release_reader(&self, reader: JoinHandle<()>) {
        let status = self.shared.lock();
        let (status, _) = self
            .shared
            .changed
            .wait_timeout_while(status, READER_GRACE, |s| !s.reader_done)
            .unwrap_or_else(PoisonError::into_inner);
        let done = status.reader_done;
        drop(status);

        if !done {
            debug!("Decoder output still held open by a child process; detaching reader");
            return;
        }
        if reader.join().is_err() {
            warn!("Decoder reader thread panicked");
        }
    }

    fn process_slot(&self) -> MutexGuard<'_, Option<Box<dyn DecoderProcess>>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        self.stop();
    }
}
