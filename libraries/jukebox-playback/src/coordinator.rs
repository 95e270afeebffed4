//! Playback coordinator
//!
//! Top-level state machine. A worker thread owns the active decoder session and
//! reacts to three inputs, multiplexed with `select!`:
//! - commands from the UI handle
//! - session events from the response reader (tagged with a generation so
//!   events from a previous session are ignored)
//! - a position tick
//!
//! ```text
//! Stopped -> Loading -> Playing <-> Paused
//!               |          |
//!               |          v
//!               +----> Transitioning -> Loading | Stopped
//! ```
//!
//! Commands that abandon the current track (stop, skip, play-now, shutdown)
//! also flag the active session as interrupted from the calling thread, so a
//! worker blocked in the open handshake is released immediately. Only the
//! worker writes to, kills and reaps decoder processes.

use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::{ErrorCode, PlaybackError, Result};
use crate::events::{emit, PlaybackEvent, EVENT_BUFFER};
use crate::launch::ProcessLauncher;
use crate::protocol::DecoderCommand;
use crate::queue::PlaybackQueue;
use crate::session::{DecoderSession, SessionEvent, SessionEventKind};
use crate::settings::DecoderSettings;
use crate::types::{CoordinatorState, PlaybackConfig, QueueItem, TrackLocation, TrackRef};

/// Catalog lookup used by continue mode
pub trait Catalog: Send + Sync {
    /// Track that follows `track` in catalog order
    fn next_after(&self, track: &TrackRef) -> Option<Arc<TrackRef>>;
}

#[derive(Debug)]
enum Command {
    Play,
    PlayNow,
    Stop,
    Pause,
    Resume,
    Skip,
    Seek(f32),
    SetVolume(f32),
    Shutdown,
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Arc<DecoderSession>>,
    /// Abandoning commands sent but not yet handled by the worker
    interrupts: u32,
}

struct Shared {
    state: Mutex<CoordinatorState>,
    slot: Mutex<SessionSlot>,
}

impl Shared {
    fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flag the active session and the next open as abandoned
    fn interrupt(&self) {
        let mut slot = self.slot();
        slot.interrupts += 1;
        if let Some(session) = &slot.session {
            session.interrupt();
        }
    }

    fn acknowledge_interrupt(&self) {
        let mut slot = self.slot();
        slot.interrupts = slot.interrupts.saturating_sub(1);
    }
}

/// Handle to the playback engine
///
/// Commands are queued to the worker thread; notifications are read from
/// [`events`](Self::events). Queue mutations go straight through
/// [`queue`](Self::queue).
pub struct PlaybackCoordinator {
    commands: Sender<Command>,
    events: Receiver<PlaybackEvent>,
    queue: Arc<PlaybackQueue>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackCoordinator {
    /// Start the coordinator worker
    pub fn start(
        config: PlaybackConfig,
        settings: DecoderSettings,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self> {
        let queue = PlaybackQueue::new(&config);
        Self::start_with(config, settings, launcher, queue, None)
    }

    /// Start with a catalog for continue mode
    pub fn start_with_catalog(
        config: PlaybackConfig,
        settings: DecoderSettings,
        launcher: Arc<dyn ProcessLauncher>,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self> {
        let queue = PlaybackQueue::new(&config);
        Self::start_with(config, settings, launcher, queue, Some(catalog))
    }

    /// Start with a prepared queue (e.g. seeded shuffle)
    pub fn start_with(
        config: PlaybackConfig,
        settings: DecoderSettings,
        launcher: Arc<dyn ProcessLauncher>,
        queue: PlaybackQueue,
        catalog: Option<Arc<dyn Catalog>>,
    ) -> Result<Self> {
        settings.validate()?;

        let (command_tx, command_rx) = bounded(32);
        let (event_tx, event_rx) = bounded(EVENT_BUFFER);
        let (session_tx, session_rx) = unbounded();

        let queue = Arc::new(queue);
        queue.set_event_sender(event_tx.clone());

        let shared = Arc::new(Shared {
            state: Mutex::new(CoordinatorState::Stopped),
            slot: Mutex::new(SessionSlot::default()),
        });

        let worker = Worker {
            volume: config.volume.clamp(0.0, 1.0),
            config,
            settings: Arc::new(settings),
            launcher,
            catalog,
            queue: queue.clone(),
            shared: shared.clone(),
            events: event_tx,
            commands: command_rx,
            session_tx,
            session_rx,
            generation: 0,
            active: None,
            last_track: None,
            failures: 0,
        };

        let handle = thread::Builder::new()
            .name("playback-coordinator".to_string())
            .spawn(move || worker.run())
            .map_err(PlaybackError::ProtocolIo)?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            queue,
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            PlaybackError::InvalidOperation("playback coordinator is shut down".to_string())
        })
    }

    /// Start playing the queue, or play `items` now
    ///
    /// `items` are queued at the head as planned items and the current track,
    /// if any, is skipped.
    pub fn play(&self, items: Option<Vec<QueueItem>>) -> Result<()> {
        match items {
            None => self.send(Command::Play),
            Some(items) => {
                let planned = items
                    .into_iter()
                    .map(|mut item| {
                        item.planned = true;
                        item
                    })
                    .collect();
                self.queue.push(planned, true);
                self.shared.interrupt();
                self.send(Command::PlayNow)
            }
        }
    }

    /// Stop playback
    ///
    /// A playing item is finished into history. Returns once the worker has
    /// been told; the decoder is reaped by the worker.
    pub fn stop(&self) -> Result<()> {
        self.shared.interrupt();
        self.send(Command::Stop)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    /// Abandon the current track and play the next one
    pub fn skip(&self) -> Result<()> {
        self.shared.interrupt();
        self.send(Command::Skip)
    }

    /// Seek to a fraction (0.0-1.0) of the current track
    pub fn seek(&self, fraction: f32) -> Result<()> {
        self.send(Command::Seek(fraction))
    }

    /// Set volume (0.0-1.0) for this and following tracks
    pub fn set_volume(&self, level: f32) -> Result<()> {
        self.send(Command::SetVolume(level))
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    /// Notification stream
    ///
    /// Must be drained. The buffer holds a bounded number of events; once it is
    /// full further notifications are dropped.
    pub fn events(&self) -> &Receiver<PlaybackEvent> {
        &self.events
    }

    pub fn state(&self) -> CoordinatorState {
        self.shared.state()
    }

    /// Stop playback and join the worker
    ///
    /// The decoder process is reaped before this returns. Idempotent.
    pub fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.interrupt();
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("Coordinator worker already gone");
        }
        if handle.join().is_err() {
            error!("Coordinator worker panicked");
        }
    }
}

impl Drop for PlaybackCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Track currently rendered by the decoder
struct Active {
    item: QueueItem,
    session: Arc<DecoderSession>,
    generation: u64,
    /// Position (seconds) at which intro mode moves on
    intro_end: Option<f64>,
}

enum Advance {
    Started,
    Exhausted,
    GaveUp,
    Interrupted,
}

struct Worker {
    config: PlaybackConfig,
    settings: Arc<DecoderSettings>,
    launcher: Arc<dyn ProcessLauncher>,
    catalog: Option<Arc<dyn Catalog>>,
    queue: Arc<PlaybackQueue>,
    shared: Arc<Shared>,
    events: Sender<PlaybackEvent>,
    commands: Receiver<Command>,
    session_tx: Sender<SessionEvent>,
    session_rx: Receiver<SessionEvent>,
    generation: u64,
    active: Option<Active>,
    last_track: Option<Arc<TrackRef>>,
    volume: f32,
    failures: u32,
}

impl Worker {
    fn run(mut self) {
        info!("Playback coordinator started");
        let ticker = tick(self.config.position_interval());

        loop {
            select! {
                recv(self.commands) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle_command(command),
                },
                recv(self.session_rx) -> msg => {
                    if let Ok(event) = msg {
                        self.handle_session_event(event);
                    }
                },
                recv(ticker) -> _ => self.poll_position(),
            }
        }

        self.shared.acknowledge_interrupt();
        self.halt();
        info!("Playback coordinator stopped");
    }

    fn set_state(&self, state: CoordinatorState) {
        let changed = {
            let mut current = self
                .shared
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            debug!("Coordinator state: {:?}", state);
            emit(&self.events, PlaybackEvent::StateChanged { state });
        }
    }

    fn report(&self, err: &PlaybackError) {
        if !err.is_user_visible() {
            return;
        }
        warn!("Playback error: {}", err);
        emit(
            &self.events,
            PlaybackEvent::PlaybackError {
                code: err.code(),
                message: err.to_string(),
            },
        );
    }

    fn handle_command(&mut self, command: Command) {
        debug!("Coordinator command: {:?}", command);
        match command {
            Command::Play => match self.shared.state() {
                CoordinatorState::Stopped => {
                    self.failures = 0;
                    if let Advance::Exhausted = self.advance() {
                        self.report(&PlaybackError::QueueEmpty);
                    }
                }
                CoordinatorState::Paused => self.resume(),
                _ => debug!("Already playing"),
            },
            Command::PlayNow => {
                self.shared.acknowledge_interrupt();
                self.retire_current();
                self.failures = 0;
                self.advance_after_track();
            }
            Command::Stop => {
                self.shared.acknowledge_interrupt();
                self.halt();
            }
            Command::Pause => {
                if self.shared.state() != CoordinatorState::Playing {
                    return;
                }
                if let Some(active) = &self.active {
                    match active.session.pause() {
                        Ok(()) => self.set_state(CoordinatorState::Paused),
                        Err(e) => self.report(&e),
                    }
                }
            }
            Command::Resume => self.resume(),
            Command::Skip => {
                self.shared.acknowledge_interrupt();
                if self.shared.state() == CoordinatorState::Stopped {
                    return;
                }
                self.retire_current();
                self.advance_after_track();
            }
            Command::Seek(fraction) => {
                if let Some(active) = &self.active {
                    active.session.seek(fraction);
                }
            }
            Command::SetVolume(level) => {
                self.volume = level.clamp(0.0, 1.0);
                if let Some(active) = &self.active {
                    active.session.set_volume(self.volume);
                }
            }
            Command::Shutdown => {}
        }
    }

    fn resume(&mut self) {
        if self.shared.state() != CoordinatorState::Paused {
            return;
        }
        if let Some(active) = &self.active {
            match active.session.resume() {
                Ok(()) => self.set_state(CoordinatorState::Playing),
                Err(e) => self.report(&e),
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(event.generation) {
            debug!(
                "Ignoring event from decoder session {}: {:?}",
                event.generation, event.kind
            );
            return;
        }

        match event.kind {
            SessionEventKind::Started => {}
            SessionEventKind::Length(seconds) => debug!("Track length: {:.1}s", seconds),
            SessionEventKind::Position(seconds) => self.on_position(seconds),
            SessionEventKind::EndOfStream => {
                debug!("Decoder reached end of stream");
                self.retire_current();
                self.advance_after_track();
            }
            SessionEventKind::Failed(message) => {
                emit(
                    &self.events,
                    PlaybackEvent::PlaybackError {
                        code: ErrorCode::ProtocolIo,
                        message,
                    },
                );
                self.retire_current();
                self.advance_after_track();
            }
        }
    }

    fn on_position(&mut self, position: f64) {
        let Some(active) = &self.active else {
            return;
        };
        let duration = active.session.duration().or_else(|| {
            let known = active.item.track.duration.as_secs_f64();
            (known > 0.0).then_some(known)
        });
        emit(
            &self.events,
            PlaybackEvent::PositionUpdated {
                position_secs: position,
                duration_secs: duration,
            },
        );

        if let Some(end) = active.intro_end {
            if position >= end {
                info!("Intro of {} finished", active.item.track.id);
                self.retire_current();
                self.advance_after_track();
                return;
            }
        }

        let fade = self.config.fade_duration_secs as f64;
        if fade > 0.0 {
            if let Some(duration) = duration {
                let remaining = duration - position;
                if (0.0..=fade).contains(&remaining) {
                    let level = self.volume * (remaining / fade) as f32;
                    active.session.set_volume(level);
                }
            }
        }
    }

    fn poll_position(&self) {
        if self.shared.state() != CoordinatorState::Playing {
            return;
        }
        if let Some(active) = &self.active {
            if let Err(e) = active.session.send(DecoderCommand::QueryPosition) {
                debug!("Position query failed: {}", e);
            }
        }
    }

    /// Finish the current item: history, session stop, notification
    fn retire_current(&mut self) {
        if let Some(active) = self.active.take() {
            self.set_state(CoordinatorState::Transitioning);
            self.shared.slot().session = None;
            self.queue.on_item_finished(&active.item);
            active.session.stop();
            emit(
                &self.events,
                PlaybackEvent::TrackEnded {
                    track_id: active.item.track.id.clone(),
                    item_id: active.item.id.value(),
                },
            );
        } else if let Some(item) = self.queue.current() {
            // Selected but never started (open interrupted)
            self.queue.on_item_finished(&item);
        }
    }

    /// Any state -> Stopped, clearing the current item
    ///
    /// A started track is finished like a skipped one. An item whose open was
    /// interrupted never played and goes back to the head of the queue.
    fn halt(&mut self) {
        if self.active.is_some() {
            self.retire_current();
        } else if self.queue.restore_current() {
            debug!("Returned unstarted item to the queue");
        }
        self.failures = 0;
        self.set_state(CoordinatorState::Stopped);
    }

    fn advance_after_track(&mut self) {
        if let Advance::Exhausted = self.advance() {
            info!("Queue finished");
            emit(&self.events, PlaybackEvent::PlaybackEnded);
        }
    }

    /// Open queue items until one plays or the failure guard trips
    fn advance(&mut self) -> Advance {
        loop {
            let Some(item) = self.next_item() else {
                self.set_state(CoordinatorState::Stopped);
                return Advance::Exhausted;
            };

            match self.open_item(&item) {
                Ok(()) => {
                    self.failures = 0;
                    return Advance::Started;
                }
                Err(PlaybackError::Interrupted) => {
                    debug!("Opening {} interrupted", item.track.id);
                    self.set_state(CoordinatorState::Transitioning);
                    return Advance::Interrupted;
                }
                Err(e) if !e.is_open_failure() => {
                    // Settings problem: every item would fail the same way
                    self.report(&e);
                    self.queue.restore_current();
                    self.set_state(CoordinatorState::Stopped);
                    self.failures = 0;
                    return Advance::GaveUp;
                }
                Err(e) => {
                    self.report(&e);
                    self.queue.on_item_finished(&item);
                    self.set_state(CoordinatorState::Stopped);

                    self.failures += 1;
                    if self.failures >= self.config.max_consecutive_failures.max(1) {
                        error!("Giving up after {} failed tracks", self.failures);
                        self.report(&PlaybackError::NothingPlayable(self.failures));
                        self.failures = 0;
                        return Advance::GaveUp;
                    }
                }
            }
        }
    }

    fn next_item(&mut self) -> Option<QueueItem> {
        if let Some(item) = self.queue.pop_next() {
            return Some(item);
        }
        if !self.config.continue_mode {
            return None;
        }

        let catalog = self.catalog.as_ref()?;
        let last = self.last_track.as_ref()?;
        let next = catalog.next_after(last)?;
        debug!("Continuing with catalog track {}", next.id);
        self.queue.push(vec![QueueItem::new(next)], false);
        self.queue.pop_next()
    }

    fn open_item(&mut self, item: &QueueItem) -> Result<()> {
        self.set_state(CoordinatorState::Loading);
        let track = &item.track;

        if !track.is_available() {
            let path = match &track.location {
                TrackLocation::Path(path) => path.clone(),
                TrackLocation::Url(url) => url.into(),
            };
            return Err(PlaybackError::TrackUnavailable(path));
        }

        let env = self.settings.environment()?;
        self.generation += 1;
        let generation = self.generation;
        let session = Arc::new(
            DecoderSession::new(
                self.settings.clone(),
                self.launcher.clone(),
                self.config.handshake_timeout(),
            )?
            .with_events(self.session_tx.clone(), generation),
        );

        {
            let mut slot = self.shared.slot();
            if slot.interrupts > 0 {
                return Err(PlaybackError::Interrupted);
            }
            slot.session = Some(session.clone());
        }

        let intro = &self.config.intro;
        let start_fraction = if intro.enabled {
            f32::from(intro.begin_percent.min(100)) / 100.0
        } else {
            0.0
        };

        if let Err(e) = session.open(track, start_fraction, self.volume, env) {
            self.shared.slot().session = None;
            return Err(e);
        }

        let intro_end = intro.enabled.then(|| {
            track.duration.as_secs_f64() * f64::from(start_fraction) + intro.length_secs as f64
        });

        self.active = Some(Active {
            item: item.clone(),
            session,
            generation,
            intro_end,
        });
        self.last_track = Some(track.clone());
        self.set_state(CoordinatorState::Playing);
        emit(
            &self.events,
            PlaybackEvent::TrackStarted {
                track_id: track.id.clone(),
                item_id: item.id.value(),
            },
        );
        Ok(())
    }
}
