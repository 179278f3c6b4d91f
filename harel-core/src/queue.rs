//! Three-band event queue.

use crate::event::{Event, Priority};
use std::collections::VecDeque;

/// Event queue with one FIFO per [`Priority`] band.
///
/// Dequeue always drains the lowest band number first; ordering inside a
/// band is insertion order.
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    bands: [VecDeque<Event>; 3],
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the given band.
    pub fn enqueue(&mut self, event: Event, priority: Priority) {
        self.bands[priority.band()].push_back(event);
    }

    /// Removes the next event, reporting the band it came from.
    pub fn dequeue(&mut self) -> Option<(Event, Priority)> {
        for priority in Priority::ALL {
            if let Some(event) = self.bands[priority.band()].pop_front() {
                return Some((event, priority));
            }
        }
        None
    }

    /// Returns true if the band already holds an equal event.
    pub fn contains(&self, event: &Event, priority: Priority) -> bool {
        self.bands[priority.band()].contains(event)
    }

    pub fn is_empty(&self) -> bool {
        self.bands.iter().all(VecDeque::is_empty)
    }

    pub fn len(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }

    /// Number of events waiting in one band.
    pub fn band_len(&self, priority: Priority) -> usize {
        self.bands[priority.band()].len()
    }

    /// Drops every pending event.
    pub fn clear(&mut self) {
        for band in &mut self.bands {
            band.clear();
        }
    }
}
