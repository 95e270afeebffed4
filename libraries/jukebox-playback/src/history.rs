//! Play history
//!
//! Bounded list of finished queue items, most recently played first.

use crate::types::QueueItem;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct History {
    /// Most recent = front
    items: VecDeque<QueueItem>,
    max_size: usize,
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Record a finished item
    ///
    /// If history is full, the oldest entry is discarded and returned
    pub fn push(&mut self, item: QueueItem) -> Option<QueueItem> {
        if self.max_size == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.max_size {
            self.items.pop_back()
        } else {
            None
        };
        self.items.push_front(item);
        evicted
    }

    /// Snapshot, most recent first
    pub fn items(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }

    /// Empty the history, returning entries in original play order
    pub fn drain_in_play_order(&mut self) -> Vec<QueueItem> {
        self.items.drain(..).rev().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}
