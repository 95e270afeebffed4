//! Jukebox - Playback Engine
//!
//! Drives an external audio decoder (mplayer-style) through a line-oriented
//! text protocol over its standard streams.
//!
//! This crate provides:
//! - Decoder session: one supervised process, bounded start handshake, guaranteed reap
//! - Response reader: blocking per-process reader publishing ordered state changes
//! - Playback queue: planned items, shuffle, repeat-all, drop-played, bounded history
//! - Playback coordinator: state machine tying queue, session and UI commands together
//! - Decoder settings: command template, environment, proxy, protocol verbs and patterns
//!
//! # Architecture
//!
//! ```text
//! UI ──commands──> PlaybackCoordinator ──> PlaybackQueue
//!  ^                     │
//!  └──PlaybackEvent──────┤
//!                        v
//!                  DecoderSession ──stdin──> decoder process
//!                        ^                        │
//!                        └── ResponseReader <─stdout
//! ```
//!
//! At most one decoder process is alive at a time. Process creation sits
//! behind [`ProcessLauncher`], so tests can use scripted decoders.
//!
//! # Example: Queue policies
//!
//! ```rust
//! use jukebox_playback::{PlaybackConfig, PlaybackQueue, QueueItem, TrackRef};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = PlaybackConfig {
//!     repeat_all: true,
//!     ..Default::default()
//! };
//! let queue = PlaybackQueue::new(&config);
//!
//! let a = Arc::new(TrackRef::from_path("a", "/music/a.mp3", Duration::from_secs(30)));
//! let b = Arc::new(TrackRef::from_path("b", "/music/b.mp3", Duration::from_secs(40)));
//! queue.push(vec![QueueItem::new(a), QueueItem::new(b)], false);
//!
//! let first = queue.pop_next().unwrap();
//! assert_eq!(first.track.id, "a");
//! queue.on_item_finished(&first);
//! ```
//!
//! # Example: Playing through mplayer
//!
//! ```rust,no_run
//! use jukebox_playback::{
//!     DecoderSettings, PlaybackConfig, PlaybackCoordinator, PlaybackEvent, QueueItem,
//!     SystemLauncher, TrackRef,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let coordinator = PlaybackCoordinator::start(
//!     PlaybackConfig::default(),
//!     DecoderSettings::default(),
//!     Arc::new(SystemLauncher),
//! )?;
//!
//! let track = Arc::new(TrackRef::from_path("1", "/music/song.ogg", Duration::from_secs(180)));
//! coordinator.queue().push(vec![QueueItem::new(track)], false);
//! coordinator.play(None)?;
//!
//! for event in coordinator.events() {
//!     if event == PlaybackEvent::PlaybackEnded {
//!         break;
//!     }
//! }
//! # Ok::<(), jukebox_playback::PlaybackError>(())
//! ```

pub mod coordinator;
mod error;
pub mod events;
mod history;
pub mod launch;
pub mod protocol;
pub mod proxy;
pub mod queue;
mod reader;
pub mod session;
pub mod settings;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Public exports
pub use coordinator::{Catalog, PlaybackCoordinator};
pub use error::{ErrorCode, PlaybackError, Result};
pub use events::PlaybackEvent;
pub use history::History;
pub use launch::{DecoderProcess, LaunchSpec, ProcessLauncher, SystemLauncher};
pub use protocol::{DecoderCommand, LineEvent, ResponseRules};
pub use proxy::{ObfuscatedSecret, ProxySettings};
pub use queue::PlaybackQueue;
pub use session::{DecoderSession, SessionEvent, SessionEventKind};
pub use settings::{parse_env_variables, DecoderSettings, ProtocolSettings};
pub use types::{
    CoordinatorState, DecoderState, IntroConfig, PlaybackConfig, QueueItem, QueueItemId,
    TrackLocation, TrackRef,
};
