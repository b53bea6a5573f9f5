//! Request/response sequencing for command batches.
//!
//! Every batch gets an id from a monotonically increasing counter. Once its
//! lines are written the id joins the queue of pending receive phases, and
//! replies must be consumed for ids in the order they were queued.

use std::collections::VecDeque;

/// Sequence bookkeeping for one connection.
#[derive(Debug, Default)]
pub struct Sequencer {
    next: u64,
    pending: VecDeque<u64>,
}

impl Sequencer {
    /// Creates a sequencer starting at id zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the id for a new batch.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Closes the send phase of `id` and queues its receive phase.
    pub fn start_response(&mut self, id: u64) {
        self.pending.push_back(id);
    }

    /// Completes the receive phase of `id`.
    ///
    /// Returns `true` if the id was pending, `false` otherwise.
    pub fn end_response(&mut self, id: u64) -> bool {
        let Some(pos) = self.pending.iter().position(|&p| p == id) else {
            return false;
        };
        if pos != 0 {
            tracing::warn!(
                id,
                expected = ?self.pending.front(),
                "receive phase completed out of order"
            );
        }
        self.pending.remove(pos);
        true
    }

    /// Returns the id whose replies are due next, if any.
    #[must_use]
    pub fn next_expected(&self) -> Option<u64> {
        self.pending.front().copied()
    }

    /// Returns the number of batches awaiting replies.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Returns the number of ids handed out so far.
    #[must_use]
    pub const fn issued(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase() {
        let mut seq = Sequencer::new();
        assert_eq!(seq.next_id(), 0);
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);
        assert_eq!(seq.issued(), 3);
    }

    #[test]
    fn test_receive_phases_in_order() {
        let mut seq = Sequencer::new();
        let a = seq.next_id();
        let b = seq.next_id();
        seq.start_response(a);
        seq.start_response(b);

        assert_eq!(seq.next_expected(), Some(a));
        assert!(seq.end_response(a));
        assert_eq!(seq.next_expected(), Some(b));
        assert!(seq.end_response(b));
        assert_eq!(seq.in_flight(), 0);
    }

    #[test]
    fn test_unknown_id() {
        let mut seq = Sequencer::new();
        let id = seq.next_id();
        assert!(!seq.end_response(id));

        seq.start_response(id);
        assert!(seq.end_response(id));
        // Completing again should return false
        assert!(!seq.end_response(id));
    }

    #[test]
    fn test_wraps_instead_of_overflowing() {
        let mut seq = Sequencer {
            next: u64::MAX,
            pending: VecDeque::new(),
        };
        assert_eq!(seq.next_id(), u64::MAX);
        assert_eq!(seq.next_id(), 0);
    }
}
