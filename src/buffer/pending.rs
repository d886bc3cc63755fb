//! Staging queue for live events awaiting "show new events".

use super::ordered::OrderedEventBuffer;
use crate::types::Event;
use std::collections::VecDeque;

/// Live events not yet folded into the buffer.
///
/// Held newest arrival first and never capacity-bounded.
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: VecDeque<Event>,
}

impl PendingQueue {
    /// Create an empty staging queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a newly arrived event.
    pub fn stage(&mut self, event: Event) {
        self.events.push_front(event);
    }

    /// Number of staged events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Staged events, newest arrival first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Discard everything staged.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Insert every staged event oldest arrival first, then clear.
    ///
    /// Returns the number of events inserted.
    pub fn flush(&mut self, buffer: &mut OrderedEventBuffer) -> usize {
        let count = self.events.len();
        while let Some(event) = self.events.pop_back() {
            buffer.insert(event);
        }
        count
    }
}
