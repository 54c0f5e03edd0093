use crate::packet::SequenceNumber;

/// Fixed-size circular buffer indexed by wrapping sequence numbers.
///
/// Tracks the most recent `capacity` sequence slots; used by the
/// acknowledgment handler to remember received packets for duplicate
/// suppression and ack bitfield generation.
#[derive(Debug)]
pub struct SequenceBuffer<T: Clone + Default> {
    newest: SequenceNumber,
    slots: Box<[Option<SequenceNumber>]>,
    entries: Box<[T]>,
}

impl<T: Clone + Default> SequenceBuffer<T> {
    /// Creates a buffer covering `capacity` sequence slots.
    pub fn with_capacity(capacity: u16) -> Self {
        Self {
            newest: 0,
            slots: vec![None; capacity as usize].into_boxed_slice(),
            entries: vec![T::default(); capacity as usize].into_boxed_slice(),
        }
    }

    /// One past the newest sequence number inserted so far.
    pub fn sequence_num(&self) -> SequenceNumber {
        self.newest
    }

    /// Inserts an entry, evicting anything the advance overruns.
    /// Returns None when the sequence is too old to fit in the window.
    pub fn insert(&mut self, sequence: SequenceNumber, entry: T) -> Option<&mut T> {
        let horizon = self.newest.wrapping_sub(self.slots.len() as u16);
        if sequence_less_than(sequence, horizon) {
            return None;
        }
        self.advance_to(sequence);
        let index = self.index_of(sequence);
        self.slots[index] = Some(sequence);
        self.entries[index] = entry;
        Some(&mut self.entries[index])
    }

    /// True if an entry for exactly this sequence number is present.
    pub fn exists(&self, sequence: SequenceNumber) -> bool {
        self.slots[self.index_of(sequence)] == Some(sequence)
    }

    /// Removes and returns the entry at this sequence number.
    pub fn remove(&mut self, sequence: SequenceNumber) -> Option<T> {
        if self.exists(sequence) {
            let index = self.index_of(sequence);
            self.slots[index] = None;
            Some(std::mem::take(&mut self.entries[index]))
        } else {
            None
        }
    }

    fn advance_to(&mut self, sequence: SequenceNumber) {
        if !sequence_greater_than(sequence.wrapping_add(1), self.newest) {
            return;
        }
        // Clear every slot the jump from `newest` to `sequence` passes over,
        // so stale entries from a previous lap cannot alias.
        let span = sequence.wrapping_sub(self.newest) as usize;
        if span >= self.slots.len() {
            self.slots.iter_mut().for_each(|s| *s = None);
            self.entries.iter_mut().for_each(|e| *e = T::default());
        } else {
            let mut cursor = self.newest;
            while cursor != sequence {
                let index = self.index_of(cursor);
                self.slots[index] = None;
                self.entries[index] = T::default();
                cursor = cursor.wrapping_add(1);
            }
        }
        self.newest = sequence.wrapping_add(1);
    }

    fn index_of(&self, sequence: SequenceNumber) -> usize {
        sequence as usize % self.slots.len()
    }
}

/// Wrapping comparison: true when `s1` is ahead of `s2`.
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// Wrapping comparison: true when `s1` is behind `s2`.
pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}
