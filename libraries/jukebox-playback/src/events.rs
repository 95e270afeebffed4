//! Playback events
//!
//! Notifications sent from the engine to the UI boundary. Events are emitted at:
//! - Coordinator state transitions
//! - Track start and end
//! - Position polls while playing
//! - Queue mutations
//! - Failures (one notification per failure)
//!
//! Delivery is fire-and-forget over a bounded channel; the engine never
//! waits on a slow listener. When the buffer is full new events are dropped,
//! so a listener that stops draining loses notifications instead of growing
//! memory without bound.

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

use tracing::{trace, warn};

use crate::error::ErrorCode;
use crate::types::CoordinatorState;

/// Events emitted by the playback engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    /// Coordinator entered a new state
    StateChanged {
        state: CoordinatorState,
    },

    /// Decoder reached playback for a track
    TrackStarted {
        /// Catalog track ID
        track_id: String,
        /// Queue position identity
        item_id: u64,
    },

    /// Periodic position report
    PositionUpdated {
        /// Seconds into the track
        position_secs: f64,
        /// Track length in seconds, when known
        duration_secs: Option<f64>,
    },

    /// Track finished, naturally or by skip
    TrackEnded {
        track_id: String,
        item_id: u64,
    },

    /// Queue contents changed
    QueueChanged {
        /// Items still to play
        pending: usize,
        /// Items in history
        history: usize,
    },

    /// Nothing left to play
    PlaybackEnded,

    /// User-visible failure
    PlaybackError {
        code: ErrorCode,
        message: String,
    },
}

/// Events buffered for a listener before new ones are dropped
pub(crate) const EVENT_BUFFER: usize = 1024;

impl PlaybackEvent {
    /// Periodic or bookkeeping events a UI can afford to miss
    pub fn is_chatter(&self) -> bool {
        matches!(
            self,
            PlaybackEvent::PositionUpdated { .. } | PlaybackEvent::QueueChanged { .. }
        )
    }
}

/// Send without blocking; a departed listener is not an error
pub(crate) fn emit(events: &Sender<PlaybackEvent>, event: PlaybackEvent) {
    match events.try_send(event) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(event)) if event.is_chatter() => {
            trace!("Event buffer full, dropping {:?}", event);
        }
        Err(TrySendError::Full(event)) => {
            warn!("Event buffer full, dropping {:?}", event);
        }
    }
}
