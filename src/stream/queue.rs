//! FIFO buffer of fragments awaiting a flush cycle.

use std::collections::VecDeque;

use crate::models::{AggregatedState, Fragment};

/// Ordered, append-only buffer of not-yet-merged fragments.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    pending: VecDeque<Fragment>,
    total_enqueued: u64,
}

impl ChunkQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment to the tail.
    pub fn push(&mut self, fragment: Fragment) {
        self.pending.push_back(fragment);
        self.total_enqueued += 1;
    }

    /// Number of fragments currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the queue currently holds no fragments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether any fragment was ever pushed onto this queue.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.total_enqueued > 0
    }

    /// How many fragments one flush cycle should drain.
    ///
    /// `max(1, round(len / divisor))`, rounding halves up.
    #[must_use]
    pub fn batch_size(&self, divisor: u32) -> usize {
        let divisor = usize::try_from(divisor.max(1)).unwrap_or(usize::MAX);
        ((self.pending.len() + divisor / 2) / divisor).max(1)
    }

    /// Remove up to `max_count` fragments from the head and merge them into
    /// `state` in FIFO order. Returns the number actually drained.
    pub fn drain_into(&mut self, max_count: usize, state: &mut AggregatedState) -> usize {
        let count = max_count.min(self.pending.len());
        for fragment in self.pending.drain(..count) {
            state.merge(fragment);
        }
        count
    }

    /// Drop every buffered fragment.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
