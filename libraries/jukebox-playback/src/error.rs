//! Error types for the playback engine

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Playback errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Decoder executable missing or could not be launched
    #[error("Could not launch decoder '{program}': {source}")]
    ProcessSpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Decoder never confirmed playback start within the handshake ceiling
    #[error("Decoder did not start playback within {0:?}")]
    HandshakeTimeout(Duration),

    /// Decoder reported end of stream before playback started
    #[error("{0} could not be read")]
    PrematureEof(String),

    /// Pipe read/write failure outside of a deliberate stop
    #[error("Decoder protocol I/O error: {0}")]
    ProtocolIo(#[from] std::io::Error),

    /// Command issued while the session is not playing
    #[error("Decoder session is not playing")]
    SessionNotPlaying,

    /// Open was aborted by a deliberate stop
    #[error("Decoder session was stopped while opening")]
    Interrupted,

    /// Track file is not reachable (device unmounted, file removed)
    #[error("Track is unavailable: {0}")]
    TrackUnavailable(PathBuf),

    /// Too many consecutive tracks failed to open
    #[error("Nothing playable: {0} consecutive tracks failed")]
    NothingPlayable(u32),

    /// Queue is empty
    #[error("Queue is empty")]
    QueueEmpty,

    /// Index out of bounds
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A configured response pattern does not compile
    #[error("Invalid response pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Decoder settings are malformed
    #[error("Invalid decoder settings: {0}")]
    Settings(String),
}

/// Stable error codes reported to the UI boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    SpawnFailure,
    HandshakeTimeout,
    UnreadableTrack,
    ProtocolIo,
    NotPlaying,
    Interrupted,
    TrackUnavailable,
    NothingPlayable,
    QueueEmpty,
    InvalidRequest,
    Configuration,
}

impl PlaybackError {
    /// Code used in `PlaybackEvent::PlaybackError`
    pub fn code(&self) -> ErrorCode {
        match self {
            PlaybackError::ProcessSpawnFailure { .. } => ErrorCode::SpawnFailure,
            PlaybackError::HandshakeTimeout(_) => ErrorCode::HandshakeTimeout,
            PlaybackError::PrematureEof(_) => ErrorCode::UnreadableTrack,
            PlaybackError::ProtocolIo(_) => ErrorCode::ProtocolIo,
            PlaybackError::SessionNotPlaying => ErrorCode::NotPlaying,
            PlaybackError::Interrupted => ErrorCode::Interrupted,
            PlaybackError::TrackUnavailable(_) => ErrorCode::TrackUnavailable,
            PlaybackError::NothingPlayable(_) => ErrorCode::NothingPlayable,
            PlaybackError::QueueEmpty => ErrorCode::QueueEmpty,
            PlaybackError::IndexOutOfBounds(_) | PlaybackError::InvalidOperation(_) => {
                ErrorCode::InvalidRequest
            }
            PlaybackError::InvalidPattern(_) | PlaybackError::Settings(_) => {
                ErrorCode::Configuration
            }
        }
    }

    /// Whether this failure warrants a notification to the user.
    ///
    /// An interrupted open is the normal consequence of `stop()`.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, PlaybackError::Interrupted)
    }

    /// Whether the coordinator should fall back to the next queue item
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            PlaybackError::ProcessSpawnFailure { .. }
                | PlaybackError::HandshakeTimeout(_)
                | PlaybackError::PrematureEof(_)
                | PlaybackError::ProtocolIo(_)
                | PlaybackError::TrackUnavailable(_)
        )
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
