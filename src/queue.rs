//! Bounded FIFO of pending events.
//!
//! The queue is the only shared mutable store between the capture side and
//! the sender.  Freshness beats age: on overflow the head (oldest) event is
//! evicted to make room, for all kinds equally.  Overflow is a warning, not
//! an error.

use std::collections::VecDeque;

use lookout_protocol::Event;
use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded FIFO with oldest-drop overflow.
#[derive(Debug)]
pub struct EventQueue {
    buf: VecDeque<Event>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            buf: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append an event, evicting the head first when full.
    ///
    /// Returns `true` when an older event was dropped to make room.
    pub fn enqueue(&mut self, event: Event) -> bool {
        let mut dropped = false;
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
            dropped = true;
            warn!(capacity = self.capacity, "event queue full, dropping oldest event");
        }
        self.buf.push_back(event);
        dropped
    }

    /// Remove and return the first `n` events, or all when `n` is `None`.
    pub fn drain(&mut self, n: Option<usize>) -> Vec<Event> {
        let count = n.unwrap_or(self.buf.len()).min(self.buf.len());
        self.buf.drain(..count).collect()
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Copy of the pending events in order, head first.  Side-effect-free.
    pub fn snapshot(&self) -> Vec<Event> {
        self.buf.iter().cloned().collect()
    }
}
