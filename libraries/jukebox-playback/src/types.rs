//! Core types for playback management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where the decoder reads a track from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackLocation {
    /// Local file (absolute path)
    Path(PathBuf),

    /// Network stream (web radio, remote file)
    Url(String),
}

impl TrackLocation {
    /// Argument handed to the decoder
    pub fn as_argument(&self) -> String {
        match self {
            TrackLocation::Path(path) => path.to_string_lossy().into_owned(),
            TrackLocation::Url(url) => url.clone(),
        }
    }

    /// Local path, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            TrackLocation::Path(path) => Some(path),
            TrackLocation::Url(_) => None,
        }
    }
}

/// Track information supplied by the catalog
///
/// Immutable once created. The queue shares it through `Arc` and never
/// mutates it; the catalog may drop its own copy at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    /// Catalog identifier
    pub id: String,

    /// File or URL to decode
    pub location: TrackLocation,

    /// Track duration (zero when unknown)
    pub duration: Duration,

    /// Display-only metadata
    pub author: Option<String>,
    pub album: Option<String>,
    pub style: Option<String>,
    pub year: Option<u32>,
}

impl TrackRef {
    /// Local file track with no display metadata
    pub fn from_path(id: impl Into<String>, path: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            id: id.into(),
            location: TrackLocation::Path(path.into()),
            duration,
            author: None,
            album: None,
            style: None,
            year: None,
        }
    }

    /// Network stream track
    pub fn from_url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: TrackLocation::Url(url.into()),
            duration: Duration::ZERO,
            author: None,
            album: None,
            style: None,
            year: None,
        }
    }

    /// Whether the decoder can reach the track right now.
    ///
    /// URLs are always assumed reachable; files must exist.
    pub fn is_available(&self) -> bool {
        match &self.location {
            TrackLocation::Path(path) => path.exists(),
            TrackLocation::Url(_) => true,
        }
    }
}

/// Unique queue-position identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueItemId(u64);

impl QueueItemId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// A track plus queue-local scheduling attributes
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Identity of this queue position
    pub id: QueueItemId,

    /// Catalog track (shared, not owned)
    pub track: Arc<TrackRef>,

    /// Scheduled ahead of normal/shuffle order
    pub planned: bool,

    /// Re-queued at the tail once played
    pub repeat: bool,

    /// Play-order rank, assigned when the item is pushed
    pub rank: u64,
}

impl QueueItem {
    /// Normal queue item
    pub fn new(track: Arc<TrackRef>) -> Self {
        Self {
            id: QueueItemId::next(),
            track,
            planned: false,
            repeat: false,
            rank: 0,
        }
    }

    /// Item scheduled ahead of normal order
    pub fn planned(track: Arc<TrackRef>) -> Self {
        Self {
            planned: true,
            ..Self::new(track)
        }
    }

    /// Item that goes back to the queue tail after playing
    pub fn repeating(track: Arc<TrackRef>) -> Self {
        Self {
            repeat: true,
            ..Self::new(track)
        }
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueueItem {}

/// Decoder session state
///
/// Only the decoder session transitions between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderState {
    /// No process launched yet
    Idle,

    /// Process launched, waiting for playback start
    Opening,

    /// Decoder is producing audio
    Playing,

    /// Stopped deliberately
    Stopped,

    /// Decoder reached end of stream
    Eof,

    /// Open or protocol failure
    Error,
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    /// No track loaded
    Stopped,

    /// Opening a decoder session
    Loading,

    /// Currently playing
    Playing,

    /// Paused mid-track
    Paused,

    /// Finishing one item and choosing the next
    Transitioning,
}

/// Intro scan: play a short excerpt of each track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntroConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Start position in percent of the track
    #[serde(default)]
    pub begin_percent: u8,

    /// Excerpt length in seconds
    #[serde(default = "default_intro_length")]
    pub length_secs: u64,
}

fn default_intro_length() -> u64 {
    20
}

impl Default for IntroConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            begin_percent: 0,
            length_secs: default_intro_length(),
        }
    }
}

/// Configuration for queue policy and coordinator behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Maximum history size (default: 100)
    ///
    /// Repeat-all replays from history, so it also bounds the repeated loop.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Initial volume, 0.0-1.0 (default: 0.5)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Refill pending from history once exhausted
    #[serde(default)]
    pub repeat_all: bool,

    /// Pick a random pending item instead of the head
    #[serde(default)]
    pub shuffle: bool,

    /// Continue with the catalog's next track when the queue runs dry
    #[serde(default)]
    pub continue_mode: bool,

    /// Discard finished items instead of keeping them in history
    #[serde(default)]
    pub drop_played: bool,

    /// Auto-skips allowed in a row before giving up (default: 5)
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// Ceiling for the decoder start handshake (default: 30)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Position polling interval (default: 500)
    #[serde(default = "default_position_interval")]
    pub position_interval_ms: u64,

    /// Fade-out length at the end of each track, 0 = off
    #[serde(default)]
    pub fade_duration_secs: u64,

    #[serde(default)]
    pub intro: IntroConfig,
}

fn default_history_size() -> usize {
    100
}

fn default_volume() -> f32 {
    0.5
}

fn default_max_failures() -> u32 {
    5
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_position_interval() -> u64 {
    500
}

impl PlaybackConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms.max(1))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            volume: default_volume(),
            repeat_all: false,
            shuffle: false,
            continue_mode: false,
            drop_played: false,
            max_consecutive_failures: default_max_failures(),
            handshake_timeout_secs: default_handshake_timeout(),
            position_interval_ms: default_position_interval(),
            fade_duration_secs: 0,
            intro: IntroConfig::default(),
        }
    }
}
