use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use facilitator_core::{constants::ACK_REDUNDANCY, shared::SharedBytes};

use crate::{
    packet::SequenceNumber,
    sequence_buffer::{sequence_less_than, SequenceBuffer},
};

const RTT_SMOOTHING: f32 = 0.10;
const SENT_TABLE_CAPACITY: usize = 256;

/// A reliable packet scheduled for retransmission.
#[derive(Debug, Clone)]
pub struct Retransmit {
    /// Sequence number being retried.
    pub sequence: SequenceNumber,
    /// Channel the payload was sent on.
    pub channel_id: u8,
    /// Whether the payload is ordered on its channel.
    pub ordered: bool,
    /// The payload bytes.
    pub payload: SharedBytes,
}

#[derive(Debug)]
struct SentEntry {
    channel_id: u8,
    ordered: bool,
    payload: SharedBytes,
    first_sent: Instant,
    attempts: u8,
    next_retry: Instant,
}

/// Marker for a received sequence number.
#[derive(Clone, Default)]
pub struct ReceivedMarker;

/// Tracks reliable delivery in both directions for one link.
///
/// Outgoing: assigns sequence numbers, remembers unacknowledged payloads,
/// and schedules exponential-backoff retransmissions. Incoming: remembers
/// recent sequence numbers for duplicate suppression and produces the
/// redundant ack bitfield.
pub struct AcknowledgmentHandler {
    sequence_number: SequenceNumber,
    sent_packets: HashMap<SequenceNumber, SentEntry>,
    received_packets: SequenceBuffer<ReceivedMarker>,
    smoothed_rtt: Option<Duration>,
}

impl AcknowledgmentHandler {
    /// Creates a fresh handler with no history.
    pub fn new() -> Self {
        AcknowledgmentHandler {
            sequence_number: 0,
            sent_packets: HashMap::with_capacity(SENT_TABLE_CAPACITY),
            received_packets: SequenceBuffer::with_capacity(ACK_REDUNDANCY + 1),
            smoothed_rtt: None,
        }
    }

    /// Number of reliable packets awaiting acknowledgment.
    pub fn packets_in_flight(&self) -> u16 {
        self.sent_packets.len() as u16
    }

    /// Assigns the sequence number for the next outgoing reliable packet.
    pub fn next_sequence(&mut self) -> SequenceNumber {
        let sequence = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        sequence
    }

    /// Remembers an outgoing reliable packet for retransmission.
    pub fn track_sent(
        &mut self,
        sequence: SequenceNumber,
        channel_id: u8,
        ordered: bool,
        payload: SharedBytes,
        now: Instant,
        retransmit_base: Duration,
    ) {
        self.sent_packets.insert(sequence, SentEntry {
            channel_id,
            ordered,
            payload,
            first_sent: now,
            attempts: 0,
            next_retry: now + retransmit_base,
        });
    }

    /// Most recent remote sequence number received.
    pub fn remote_sequence_num(&self) -> SequenceNumber {
        self.received_packets.sequence_num().wrapping_sub(1)
    }

    /// Bitfield acknowledging the 32 packets before `remote_sequence_num`.
    pub fn ack_bitfield(&self) -> u32 {
        let newest = self.remote_sequence_num();
        let mut bitfield: u32 = 0;
        let mut mask: u32 = 1;
        for offset in 1..=ACK_REDUNDANCY {
            if self.received_packets.exists(newest.wrapping_sub(offset)) {
                bitfield |= mask;
            }
            mask <<= 1;
        }
        bitfield
    }

    /// True if this incoming sequence number was already delivered.
    pub fn is_duplicate(&self, sequence: SequenceNumber) -> bool {
        self.received_packets.exists(sequence)
    }

    /// Records an incoming reliable sequence number.
    pub fn record_received(&mut self, sequence: SequenceNumber) {
        self.received_packets.insert(sequence, ReceivedMarker);
    }

    /// Processes an acknowledgment command, releasing acked packets.
    pub fn process_ack(&mut self, sequence: SequenceNumber, mut mask: u32, now: Instant) {
        if let Some(entry) = self.sent_packets.remove(&sequence) {
            // Karn: only sample RTT from packets that were never retransmitted.
            if entry.attempts == 0 {
                self.observe_rtt(now.saturating_duration_since(entry.first_sent));
            }
        }
        for offset in 1..=ACK_REDUNDANCY {
            if mask & 1 == 1 {
                let acked = sequence.wrapping_sub(offset);
                if let Some(entry) = self.sent_packets.remove(&acked) {
                    if entry.attempts == 0 {
                        self.observe_rtt(now.saturating_duration_since(entry.first_sent));
                    }
                }
            }
            mask >>= 1;
        }
    }

    /// Reschedules one sequence for immediate retransmission, if still in flight.
    /// Used when the remote reports a stalled ordered stream.
    pub fn expedite(&mut self, sequence: SequenceNumber, now: Instant) {
        if let Some(entry) = self.sent_packets.get_mut(&sequence) {
            entry.next_retry = now;
        }
    }

    /// Collects packets whose retransmission timer has elapsed, doubling each
    /// one's backoff. Returns the packets to resend and whether any packet
    /// exhausted its attempt budget (the link should then be reported failed).
    pub fn due_retransmits(
        &mut self,
        now: Instant,
        retransmit_base: Duration,
        delay_cap: Duration,
        max_attempts: u8,
    ) -> (Vec<Retransmit>, bool) {
        let mut resend = Vec::new();
        let mut exhausted = false;

        let mut due: Vec<SequenceNumber> = self
            .sent_packets
            .iter()
            .filter(|(_, entry)| entry.next_retry <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        due.sort_unstable_by(|a, b| {
            if sequence_less_than(*a, *b) {
                std::cmp::Ordering::Less
            } else if a == b {
                std::cmp::Ordering::Equal
            } else {
                std::cmp::Ordering::Greater
            }
        });

        for sequence in due {
            let entry = match self.sent_packets.get_mut(&sequence) {
                Some(entry) => entry,
                None => continue,
            };
            if entry.attempts >= max_attempts {
                exhausted = true;
                continue;
            }
            entry.attempts += 1;
            let backoff = retransmit_base
                .checked_mul(1u32 << entry.attempts.min(16))
                .unwrap_or(delay_cap)
                .min(delay_cap);
            entry.next_retry = now + backoff;
            resend.push(Retransmit {
                sequence,
                channel_id: entry.channel_id,
                ordered: entry.ordered,
                payload: entry.payload.clone(),
            });
        }

        (resend, exhausted)
    }

    /// Smoothed round-trip estimate, if any acknowledgments arrived yet.
    pub fn rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    /// Feeds a round-trip sample into the smoothed estimate.
    pub fn observe_rtt(&mut self, sample: Duration) {
        self.smoothed_rtt = Some(match self.smoothed_rtt {
            None => sample,
            Some(current) => {
                let current = current.as_secs_f32();
                Duration::from_secs_f32(current + RTT_SMOOTHING * (sample.as_secs_f32() - current))
            }
        });
    }
}

impl Default for AcknowledgmentHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const CAP: Duration = Duration::from_secs(2);

    fn track(handler: &mut AcknowledgmentHandler, now: Instant) -> SequenceNumber {
        let sequence = handler.next_sequence();
        handler.track_sent(sequence, 0, true, vec![1, 2, 3].into(), now, BASE);
        sequence
    }

    #[test]
    fn ack_releases_in_flight_packets() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        let first = track(&mut handler, now);
        let second = track(&mut handler, now);
        assert_eq!(handler.packets_in_flight(), 2);

        handler.process_ack(second, 0b1, now + Duration::from_millis(40));
        assert_eq!(handler.packets_in_flight(), 0);
        assert!(handler.rtt().is_some());
        let _ = first;
    }

    #[test]
    fn nothing_due_before_base_interval() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        track(&mut handler, now);

        let (resend, exhausted) =
            handler.due_retransmits(now + Duration::from_millis(50), BASE, CAP, 8);
        assert!(resend.is_empty());
        assert!(!exhausted);
    }

    #[test]
    fn backoff_doubles_between_attempts() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        let sequence = track(&mut handler, now);

        // First retry due at +100ms.
        let (resend, _) = handler.due_retransmits(now + BASE, BASE, CAP, 8);
        assert_eq!(resend.len(), 1);
        assert_eq!(resend[0].sequence, sequence);

        // Second retry now scheduled at +100ms + 200ms.
        let (resend, _) = handler.due_retransmits(now + Duration::from_millis(250), BASE, CAP, 8);
        assert!(resend.is_empty());
        let (resend, _) = handler.due_retransmits(now + Duration::from_millis(310), BASE, CAP, 8);
        assert_eq!(resend.len(), 1);
    }

    #[test]
    fn attempts_cap_reports_exhaustion() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        track(&mut handler, now);

        let mut when = now;
        for _ in 0..3 {
            when += Duration::from_secs(10);
            let (_, exhausted) = handler.due_retransmits(when, BASE, CAP, 3);
            assert!(!exhausted);
        }
        when += Duration::from_secs(10);
        let (resend, exhausted) = handler.due_retransmits(when, BASE, CAP, 3);
        assert!(resend.is_empty());
        assert!(exhausted);
    }

    #[test]
    fn expedite_forces_immediate_retry() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        let sequence = track(&mut handler, now);

        handler.expedite(sequence, now);
        let (resend, _) = handler.due_retransmits(now, BASE, CAP, 8);
        assert_eq!(resend.len(), 1);
        assert_eq!(resend[0].sequence, sequence);
    }

    #[test]
    fn duplicate_detection_and_bitfield() {
        let mut handler = AcknowledgmentHandler::new();
        for sequence in [0u16, 1, 2, 4] {
            assert!(!handler.is_duplicate(sequence));
            handler.record_received(sequence);
            assert!(handler.is_duplicate(sequence));
        }
        assert_eq!(handler.remote_sequence_num(), 4);
        // Offsets 2, 3, 4 back from 4 are present (2, 1, 0); offset 1 (3) is missing.
        assert_eq!(handler.ack_bitfield() & 0b1111, 0b1110);
    }

    #[test]
    fn retransmitted_packets_do_not_skew_rtt() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        let sequence = track(&mut handler, now);

        let (resend, _) = handler.due_retransmits(now + BASE, BASE, CAP, 8);
        assert_eq!(resend.len(), 1);

        handler.process_ack(sequence, 0, now + Duration::from_secs(5));
        assert!(handler.rtt().is_none());
    }

    #[test]
    fn sequence_wraparound_ack() {
        let mut handler = AcknowledgmentHandler::new();
        let now = Instant::now();
        // Drain the sequence space to just before the wrap.
        for _ in 0..65535 {
            handler.next_sequence();
        }
        let last = track(&mut handler, now); // 65535
        let first = track(&mut handler, now); // 0
        assert_eq!(last, 65535);
        assert_eq!(first, 0);

        handler.process_ack(0, 0b1, now);
        assert_eq!(handler.packets_in_flight(), 0);
    }
}
