use std::collections::HashMap;

use facilitator_core::shared::SharedBytes;

use crate::{
    packet::SequenceNumber,
    sequence_buffer::sequence_less_than,
};

/// Result of offering an ordered arrival to the reorder buffer.
#[derive(Debug, PartialEq)]
pub enum ReorderOutcome {
    /// Zero or more payloads are now deliverable in sequence order.
    Ready(Vec<SharedBytes>),
    /// The arrival precedes the release point; it was already delivered.
    Stale,
    /// The arrival is beyond the reorder window and was dropped. The sender
    /// should be asked to retransmit `expected`, the stalled head.
    OutOfWindow {
        /// Sequence number the stream is blocked on.
        expected: SequenceNumber,
    },
}

/// Bounded reorder window for one ordered channel.
///
/// Arrivals ahead of the expected sequence are held back until the gap fills;
/// anything `window` or more ahead is refused so a lost packet cannot grow
/// the buffer without bound.
#[derive(Debug)]
pub struct ReorderBuffer {
    expected: SequenceNumber,
    window: u16,
    pending: HashMap<SequenceNumber, SharedBytes>,
}

impl ReorderBuffer {
    /// Creates a buffer releasing from sequence 0 with the given window.
    pub fn new(window: u16) -> Self {
        Self { expected: 0, window: window.max(1), pending: HashMap::new() }
    }

    /// Sequence number the channel will release next.
    pub fn expected(&self) -> SequenceNumber {
        self.expected
    }

    /// Number of buffered out-of-order payloads.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Offers an arrival; returns what may now be delivered.
    pub fn accept(&mut self, sequence: SequenceNumber, data: SharedBytes) -> ReorderOutcome {
        if sequence_less_than(sequence, self.expected) {
            return ReorderOutcome::Stale;
        }
        if sequence.wrapping_sub(self.expected) >= self.window {
            return ReorderOutcome::OutOfWindow { expected: self.expected };
        }

        self.pending.insert(sequence, data);

        let mut ready = Vec::new();
        while let Some(payload) = self.pending.remove(&self.expected) {
            ready.push(payload);
            self.expected = self.expected.wrapping_add(1);
        }
        ReorderOutcome::Ready(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(value: u8) -> SharedBytes {
        vec![value].into()
    }

    #[test]
    fn in_order_arrivals_release_immediately() {
        let mut buffer = ReorderBuffer::new(8);
        assert_eq!(buffer.accept(0, bytes(0)), ReorderOutcome::Ready(vec![bytes(0)]));
        assert_eq!(buffer.accept(1, bytes(1)), ReorderOutcome::Ready(vec![bytes(1)]));
        assert_eq!(buffer.expected(), 2);
    }

    #[test]
    fn gap_holds_back_until_filled() {
        let mut buffer = ReorderBuffer::new(8);
        assert_eq!(buffer.accept(1, bytes(1)), ReorderOutcome::Ready(vec![]));
        assert_eq!(buffer.accept(2, bytes(2)), ReorderOutcome::Ready(vec![]));
        assert_eq!(buffer.pending_len(), 2);

        let released = buffer.accept(0, bytes(0));
        assert_eq!(released, ReorderOutcome::Ready(vec![bytes(0), bytes(1), bytes(2)]));
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn late_duplicate_is_stale() {
        let mut buffer = ReorderBuffer::new(8);
        buffer.accept(0, bytes(0));
        assert_eq!(buffer.accept(0, bytes(0)), ReorderOutcome::Stale);
    }

    #[test]
    fn arrivals_beyond_window_are_refused() {
        let mut buffer = ReorderBuffer::new(4);
        assert_eq!(
            buffer.accept(4, bytes(4)),
            ReorderOutcome::OutOfWindow { expected: 0 }
        );
        // Just inside the window is accepted.
        assert_eq!(buffer.accept(3, bytes(3)), ReorderOutcome::Ready(vec![]));
    }

    #[test]
    fn window_slides_across_wraparound() {
        let mut buffer = ReorderBuffer::new(8);
        // Fast-forward the release point near the top of the range.
        for sequence in 0..=65534u16 {
            buffer.accept(sequence, bytes(0));
        }
        assert_eq!(buffer.expected(), 65535);
        assert_eq!(buffer.accept(0, bytes(7)), ReorderOutcome::Ready(vec![]));
        assert_eq!(
            buffer.accept(65535, bytes(6)),
            ReorderOutcome::Ready(vec![bytes(6), bytes(7)])
        );
        assert_eq!(buffer.expected(), 1);
    }
}
