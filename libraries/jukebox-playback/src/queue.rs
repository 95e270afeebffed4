//! Playback queue
//!
//! Pending items, the single current item and a bounded history, behind one
//! lock owned by the queue. The lock is held for one operation at a time and
//! never across a decoder open.
//!
//! ```text
//! pending:  [planned..., normal...]   <- push / insert / remove / reorder
//!                 |
//!             pop_next()
//!                 v
//! current:  item being rendered
//!                 |
//!           on_item_finished()
//!                 v
//! history:  most recent first, capped  (or dropped / re-queued)
//! ```
//!
//! Selection order in [`PlaybackQueue::pop_next`]:
//! 1. First planned item
//! 2. Random pending item when shuffle is on
//! 3. Head of pending
//!
//! With repeat-all, an exhausted pending list is refilled from history in
//! original play order before selecting. History is capped, so a loop longer
//! than `history_size` only replays the most recent `history_size` items.

use crossbeam_channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::{PlaybackError, Result};
use crate::events::{emit, PlaybackEvent};
use crate::history::History;
use crate::types::{PlaybackConfig, QueueItem, QueueItemId};

struct QueueInner {
    pending: VecDeque<QueueItem>,
    current: Option<QueueItem>,
    history: History,
    repeat_all: bool,
    shuffle: bool,
    drop_played: bool,
    next_rank: u64,
    rng: Box<dyn RngCore + Send>,
}

impl QueueInner {
    fn rank(&mut self, mut item: QueueItem) -> QueueItem {
        item.rank = self.next_rank;
        self.next_rank += 1;
        item
    }

    fn select_index(&mut self) -> Option<usize> {
        if self.pending.is_empty() {
            return None;
        }
        if let Some(index) = self.pending.iter().position(|item| item.planned) {
            return Some(index);
        }
        if self.shuffle {
            return Some(self.rng.gen_range(0..self.pending.len()));
        }
        Some(0)
    }

    fn finish(&mut self, mut item: QueueItem) {
        if item.repeat {
            item.planned = false;
            let item = self.rank(item);
            self.pending.push_back(item);
        } else if self.drop_played {
            debug!("Dropping played item {}", item.track.id);
        } else if let Some(evicted) = self.history.push(item) {
            if self.repeat_all {
                warn!(
                    "History full; {} will not be replayed by repeat-all",
                    evicted.track.id
                );
            } else {
                debug!("History full, forgetting {}", evicted.track.id);
            }
        }
    }
}

/// Thread-safe play queue
pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
    events: Mutex<Option<Sender<PlaybackEvent>>>,
}

impl PlaybackQueue {
    /// Create an empty queue with the policies from `config`
    pub fn new(config: &PlaybackConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a queue with a specific random source for shuffle
    pub fn with_rng(config: &PlaybackConfig, rng: impl RngCore + Send + 'static) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                current: None,
                history: History::new(config.history_size),
                repeat_all: config.repeat_all,
                shuffle: config.shuffle,
                drop_played: config.drop_played,
                next_rank: 0,
                rng: Box::new(rng),
            }),
            events: Mutex::new(None),
        }
    }

    /// Publish `QueueChanged` on `events` after each mutation
    pub fn set_event_sender(&self, events: Sender<PlaybackEvent>) {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one mutation under the lock, then notify outside of it
    fn mutate<T>(&self, f: impl FnOnce(&mut QueueInner) -> T) -> T {
        let (result, pending, history) = {
            let mut inner = self.lock();
            let result = f(&mut inner);
            (result, inner.pending.len(), inner.history.len())
        };
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(events) = events.as_ref() {
            emit(events, PlaybackEvent::QueueChanged { pending, history });
        }
        result
    }

    /// Append a batch, or prepend it for "play now"
    pub fn push(&self, items: Vec<QueueItem>, at_head: bool) {
        self.mutate(|inner| {
            let ranked: Vec<QueueItem> = items.into_iter().map(|i| inner.rank(i)).collect();
            if at_head {
                for item in ranked.into_iter().rev() {
                    inner.pending.push_front(item);
                }
            } else {
                inner.pending.extend(ranked);
            }
        });
    }

    /// Insert a batch before pending position `index`
    pub fn insert(&self, items: Vec<QueueItem>, index: usize) -> Result<()> {
        self.mutate(|inner| {
            if index > inner.pending.len() {
                return Err(PlaybackError::IndexOutOfBounds(index));
            }
            for (offset, item) in items.into_iter().enumerate() {
                let item = inner.rank(item);
                inner.pending.insert(index + offset, item);
            }
            Ok(())
        })
    }

    /// Take the item that should play next and make it current
    ///
    /// A stale current item is finished first so that at most one exists.
    pub fn pop_next(&self) -> Option<QueueItem> {
        self.mutate(|inner| {
            if let Some(stale) = inner.current.take() {
                warn!("Item {} still current when selecting next", stale.track.id);
                inner.finish(stale);
            }

            if inner.pending.is_empty() && inner.repeat_all && !inner.history.is_empty() {
                debug!("Refilling queue from {} history items", inner.history.len());
                let replay = inner.history.drain_in_play_order();
                inner.pending.extend(replay);
            }

            let index = inner.select_index()?;
            let item = inner.pending.remove(index)?;
            inner.current = Some(item.clone());
            Some(item)
        })
    }

    /// Retire the current item: history, re-queue (repeat) or discard
    ///
    /// Returns false if `item` is not the current item.
    pub fn on_item_finished(&self, item: &QueueItem) -> bool {
        self.mutate(|inner| match inner.current.take() {
            Some(current) if current.id == item.id => {
                inner.finish(current);
                true
            }
            other => {
                inner.current = other;
                false
            }
        })
    }

    /// Put the current item back at the head of pending
    pub fn restore_current(&self) -> bool {
        self.mutate(|inner| match inner.current.take() {
            Some(item) => {
                inner.pending.push_front(item);
                true
            }
            None => false,
        })
    }

    /// Drop all pending items
    pub fn clear(&self) {
        self.mutate(|inner| inner.pending.clear());
    }

    /// Forget played items; repeat-all has nothing to replay afterwards
    pub fn clear_history(&self) {
        self.mutate(|inner| inner.history.clear());
    }

    /// Remove pending items by identity; returns how many were removed
    pub fn remove(&self, ids: &[QueueItemId]) -> usize {
        self.mutate(|inner| {
            let before = inner.pending.len();
            inner.pending.retain(|item| !ids.contains(&item.id));
            before - inner.pending.len()
        })
    }

    /// Move the pending item at `from` to position `to`
    pub fn reorder(&self, from: usize, to: usize) -> Result<()> {
        self.mutate(|inner| {
            let len = inner.pending.len();
            if from >= len {
                return Err(PlaybackError::IndexOutOfBounds(from));
            }
            if to >= len {
                return Err(PlaybackError::IndexOutOfBounds(to));
            }
            if from != to {
                if let Some(item) = inner.pending.remove(from) {
                    inner.pending.insert(to, item);
                }
            }
            Ok(())
        })
    }

    /// Snapshot of pending items in queue order
    pub fn pending(&self) -> Vec<QueueItem> {
        self.lock().pending.iter().cloned().collect()
    }

    pub fn current(&self) -> Option<QueueItem> {
        self.lock().current.clone()
    }

    /// Snapshot of history, most recent first
    pub fn history(&self) -> Vec<QueueItem> {
        self.lock().history.items()
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn planned_count(&self) -> usize {
        self.lock().pending.iter().filter(|i| i.planned).count()
    }

    pub fn shuffle(&self) -> bool {
        self.lock().shuffle
    }

    pub fn set_shuffle(&self, enabled: bool) {
        self.lock().shuffle = enabled;
    }

    pub fn repeat_all(&self) -> bool {
        self.lock().repeat_all
    }

    pub fn set_repeat_all(&self, enabled: bool) {
        self.lock().repeat_all = enabled;
    }

    pub fn drop_played(&self) -> bool {
        self.lock().drop_played
    }

    pub fn set_drop_played(&self, enabled: bool) {
        self.lock().drop_played = enabled;
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("PlaybackQueue")
            .field("pending", &inner.pending.len())
            .field("current", &inner.current.as_ref().map(|i| &i.track.id))
            .field("history", &inner.history.len())
            .field("repeat_all", &inner.repeat_all)
            .field("shuffle", &inner.shuffle)
            .field("drop_played", &inner.drop_played)
            .finish()
    }
}
