use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use facilitator_core::{
    config::TransportConfig,
    constants::{DEFAULT_MTU, FRAME_HEADER_SIZE},
    error::{ErrorKind, Result},
    shared::SharedBytes,
};
use facilitator_protocol::{
    codec::{FrameDecoder, FrameEncoder},
    frame::{Frame, FrameCommand},
    packet::DeliveryMode,
    reorder::{ReorderBuffer, ReorderOutcome},
    AcknowledgmentHandler,
};

use crate::{link_state::LinkState, statistics::LinkStatistics};

/// One payload released to the application by `process_datagram`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    /// Payload bytes.
    pub data: SharedBytes,
    /// Delivery mode the sender used.
    pub mode: DeliveryMode,
    /// Transport channel the payload arrived on.
    pub channel_id: u8,
}

/// Reliability engine for one remote endpoint.
///
/// Holds the acknowledgment state, per-channel reorder buffers, and the
/// queue of commands waiting to be flushed into datagrams. The host pump
/// calls `process_datagram` for inbound traffic, `update` on every tick,
/// and `encode_pending` to drain outbound frames.
pub struct Link {
    /// Address of the remote endpoint.
    pub remote_address: SocketAddr,
    /// When we last received anything from the remote.
    pub last_heard: Instant,
    /// When we last sent anything to the remote.
    pub last_sent: Instant,

    state: LinkState,
    have_sent: bool,
    have_received: bool,
    failed: bool,

    acks: AcknowledgmentHandler,
    reorder: HashMap<u8, ReorderBuffer>,
    outgoing: VecDeque<FrameCommand>,
    ping_outstanding: Option<(u32, Instant)>,

    config: TransportConfig,
    stats: LinkStatistics,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("remote_address", &self.remote_address)
            .field("state", &self.state)
            .field("in_flight", &self.acks.packets_in_flight())
            .field("queued", &self.outgoing.len())
            .finish()
    }
}

impl Link {
    /// Creates a link for the given remote endpoint.
    pub fn new(remote_address: SocketAddr, config: &TransportConfig, time: Instant) -> Link {
        Link {
            remote_address,
            last_heard: time,
            last_sent: time,
            state: LinkState::default(),
            have_sent: false,
            have_received: false,
            failed: false,
            acks: AcknowledgmentHandler::new(),
            reorder: HashMap::new(),
            outgoing: VecDeque::new(),
            ping_outstanding: None,
            config: config.clone(),
            stats: LinkStatistics::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Traffic counters.
    pub fn statistics(&self) -> &LinkStatistics {
        &self.stats
    }

    /// Reliable packets currently awaiting acknowledgment.
    pub fn packets_in_flight(&self) -> u16 {
        self.acks.packets_in_flight()
    }

    /// Smoothed round-trip estimate, if one exists yet.
    pub fn rtt(&self) -> Option<Duration> {
        self.acks.rtt()
    }

    /// True once a retransmission budget was exhausted.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Established means traffic has flowed both ways and the link is alive.
    pub fn is_established(&self) -> bool {
        self.have_sent && self.have_received && !self.failed && self.state.is_active()
    }

    /// True if traffic ever flowed both ways, even on a now-dead link.
    pub fn was_established(&self) -> bool {
        self.have_sent && self.have_received
    }

    /// Notes an outgoing user send. Returns true if this completed establishment.
    pub fn record_send(&mut self) -> bool {
        let was = self.is_established();
        self.have_sent = true;
        self.promote();
        !was && self.is_established()
    }

    /// Notes an incoming datagram. Returns true if this completed establishment.
    pub fn record_recv(&mut self) -> bool {
        let was = self.is_established();
        self.have_received = true;
        self.promote();
        !was && self.is_established()
    }

    fn promote(&mut self) {
        if self.state == LinkState::Pending && self.have_sent && self.have_received {
            self.state = LinkState::Active;
        }
    }

    /// Time since anything was received from the remote.
    pub fn heard_gap(&self, time: Instant) -> Duration {
        time.saturating_duration_since(self.last_heard)
    }

    /// Time since anything was sent to the remote.
    pub fn sent_gap(&self, time: Instant) -> Duration {
        time.saturating_duration_since(self.last_sent)
    }

    /// Queues a user payload for transmission with the requested mode.
    pub fn enqueue_payload(
        &mut self,
        channel_id: u8,
        data: SharedBytes,
        mode: DeliveryMode,
        now: Instant,
    ) -> Result<()> {
        if data.len() > self.config.max_payload_size {
            return Err(ErrorKind::PayloadTooLarge {
                size: data.len(),
                limit: self.config.max_payload_size,
            });
        }
        match mode {
            DeliveryMode::Unreliable => {
                self.outgoing.push_back(FrameCommand::SendUnreliable { channel_id, data });
            }
            DeliveryMode::ReliableUnordered | DeliveryMode::ReliableOrdered => {
                let ordered = mode.is_ordered();
                let sequence = self.acks.next_sequence();
                self.acks.track_sent(
                    sequence,
                    channel_id,
                    ordered,
                    data.clone(),
                    now,
                    self.config.retransmit_base,
                );
                self.outgoing.push_back(FrameCommand::SendReliable {
                    channel_id,
                    sequence,
                    ordered,
                    data,
                });
            }
        }
        Ok(())
    }

    /// Queues a graceful disconnect.
    pub fn disconnect(&mut self) {
        self.outgoing.push_back(FrameCommand::Disconnect { reason: 0 });
        self.state = LinkState::Disconnecting;
    }

    /// Processes one received datagram, returning released payloads.
    pub fn process_datagram(&mut self, payload: &[u8], now: Instant) -> Result<Vec<Delivered>> {
        let frame = FrameDecoder::decode_frame(payload)?;
        self.last_heard = now;
        self.stats.record_received(payload.len());

        let mut delivered = Vec::new();
        let mut acked_something = false;

        for command in frame.commands {
            match command {
                FrameCommand::SendUnreliable { channel_id, data } => {
                    delivered.push(Delivered { data, mode: DeliveryMode::Unreliable, channel_id });
                }
                FrameCommand::SendReliable { channel_id, sequence, ordered, data } => {
                    acked_something = true;
                    self.receive_reliable(channel_id, sequence, ordered, data, &mut delivered);
                }
                FrameCommand::Acknowledge { sequence, received_mask } => {
                    self.acks.process_ack(sequence, received_mask, now);
                }
                FrameCommand::ResendRequest { channel_id: _, sequence } => {
                    self.acks.expedite(sequence, now);
                }
                FrameCommand::Ping { nonce } => {
                    self.outgoing.push_back(FrameCommand::Pong { nonce });
                }
                FrameCommand::Pong { nonce } => {
                    if let Some((expected, sent_at)) = self.ping_outstanding.take() {
                        if expected == nonce {
                            self.acks.observe_rtt(now.saturating_duration_since(sent_at));
                        }
                    }
                }
                FrameCommand::Disconnect { .. } => {
                    self.state = LinkState::Closed;
                }
            }
        }

        if acked_something {
            self.queue_ack();
        }
        Ok(delivered)
    }

    fn receive_reliable(
        &mut self,
        channel_id: u8,
        sequence: u16,
        ordered: bool,
        data: SharedBytes,
        delivered: &mut Vec<Delivered>,
    ) {
        if self.acks.is_duplicate(sequence) {
            self.stats.record_duplicate();
            return;
        }
        if !ordered {
            self.acks.record_received(sequence);
            delivered.push(Delivered { data, mode: DeliveryMode::ReliableUnordered, channel_id });
            return;
        }

        let window = self.config.reorder_window;
        let buffer = self.reorder.entry(channel_id).or_insert_with(|| ReorderBuffer::new(window));
        match buffer.accept(sequence, data) {
            ReorderOutcome::Ready(ready) => {
                // Only acknowledged once accepted: an out-of-window arrival must
                // not be acked, or the sender would never retransmit it.
                self.acks.record_received(sequence);
                for data in ready {
                    delivered.push(Delivered {
                        data,
                        mode: DeliveryMode::ReliableOrdered,
                        channel_id,
                    });
                }
            }
            ReorderOutcome::Stale => {
                self.acks.record_received(sequence);
                self.stats.record_duplicate();
            }
            ReorderOutcome::OutOfWindow { expected } => {
                self.stats.record_resend_request();
                self.outgoing
                    .push_back(FrameCommand::ResendRequest { channel_id, sequence: expected });
            }
        }
    }

    fn queue_ack(&mut self) {
        // One ack per flush is enough; drop any staler one still queued.
        self.outgoing
            .retain(|command| !matches!(command, FrameCommand::Acknowledge { .. }));
        self.outgoing.push_back(FrameCommand::Acknowledge {
            sequence: self.acks.remote_sequence_num(),
            received_mask: self.acks.ack_bitfield(),
        });
    }

    /// Runs timers: retransmissions and keepalive pings.
    pub fn update(&mut self, now: Instant) {
        let (resend, exhausted) = self.acks.due_retransmits(
            now,
            self.config.retransmit_base,
            self.config.retransmit_delay_cap,
            self.config.max_retransmit_attempts,
        );
        if exhausted {
            self.failed = true;
        }
        for retransmit in resend {
            self.stats.record_retransmission();
            self.outgoing.push_back(FrameCommand::SendReliable {
                channel_id: retransmit.channel_id,
                sequence: retransmit.sequence,
                ordered: retransmit.ordered,
                data: retransmit.payload,
            });
        }

        if self.is_established() {
            if let Some(interval) = self.config.heartbeat_interval {
                let quiet = self.sent_gap(now) >= interval && self.heard_gap(now) >= interval;
                // A lost ping must not wedge the heartbeat: replace an
                // outstanding one once a full interval has passed.
                let can_ping = match self.ping_outstanding {
                    None => true,
                    Some((_, sent_at)) => now.saturating_duration_since(sent_at) >= interval,
                };
                if quiet && can_ping {
                    let nonce = rand::random::<u32>();
                    self.ping_outstanding = Some((nonce, now));
                    self.outgoing.push_back(FrameCommand::Ping { nonce });
                }
            }
        }
    }

    /// True when commands are waiting to be flushed.
    pub fn has_pending(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Drains queued commands into MTU-sized datagrams.
    ///
    /// Any flush counts as a send for establishment purposes: a pure
    /// receiver still becomes established through its acknowledgments.
    pub fn encode_pending(&mut self, now: Instant) -> Vec<Vec<u8>> {
        if self.outgoing.is_empty() {
            return Vec::new();
        }
        self.have_sent = true;
        self.promote();

        let mtu = DEFAULT_MTU as usize;
        let mut frames = Vec::new();
        let mut current = Frame::new();
        let mut size = FRAME_HEADER_SIZE;

        while let Some(command) = self.outgoing.pop_front() {
            let len = FrameEncoder::command_len(&command);
            let full = (!current.is_empty() && size + len > mtu) || current.len() == u8::MAX as usize;
            if full {
                frames.push(std::mem::take(&mut current));
                size = FRAME_HEADER_SIZE;
            }
            current.push(command);
            size += len;
        }
        if !current.is_empty() {
            frames.push(current);
        }

        self.last_sent = now;
        frames
            .iter()
            .map(|frame| {
                let bytes = FrameEncoder::encode_frame(frame);
                self.stats.record_sent(bytes.len());
                bytes
            })
            .collect()
    }

    /// Whether the pump should drop this link, given the time.
    pub fn should_close(&self, now: Instant) -> bool {
        self.failed
            || self.state.is_closed()
            || (self.state == LinkState::Disconnecting && self.outgoing.is_empty())
            || self.packets_in_flight() > self.config.max_packets_in_flight
            || self.heard_gap(now) >= self.config.idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn pair(config: &TransportConfig, now: Instant) -> (Link, Link) {
        (Link::new(addr(), config, now), Link::new(addr(), config, now))
    }

    /// Moves every pending datagram from `from` into `to`, returning deliveries.
    fn pump(from: &mut Link, to: &mut Link, now: Instant) -> Vec<Delivered> {
        let mut out = Vec::new();
        for datagram in from.encode_pending(now) {
            out.extend(to.process_datagram(&datagram, now).unwrap());
        }
        out
    }

    #[test]
    fn reliable_ordered_round_trip() {
        let config = TransportConfig::default();
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);

        for value in 0u8..4 {
            a.enqueue_payload(1, vec![value].into(), DeliveryMode::ReliableOrdered, now).unwrap();
        }
        let delivered = pump(&mut a, &mut b, now);
        let payloads: Vec<u8> = delivered.iter().map(|d| d.data.as_slice()[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3]);
        assert!(delivered.iter().all(|d| d.mode == DeliveryMode::ReliableOrdered));

        // B acks; A's in-flight table drains.
        assert_eq!(a.packets_in_flight(), 4);
        pump(&mut b, &mut a, now);
        assert_eq!(a.packets_in_flight(), 0);
    }

    #[test]
    fn duplicate_datagram_is_suppressed() {
        let config = TransportConfig::default();
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);

        a.enqueue_payload(0, vec![7].into(), DeliveryMode::ReliableUnordered, now).unwrap();
        let datagrams = a.encode_pending(now);
        assert_eq!(datagrams.len(), 1);

        let first = b.process_datagram(&datagrams[0], now).unwrap();
        assert_eq!(first.len(), 1);
        let replay = b.process_datagram(&datagrams[0], now).unwrap();
        assert!(replay.is_empty());
        assert_eq!(b.statistics().duplicates_dropped(), 1);
    }

    #[test]
    fn lost_packet_is_retransmitted_and_recovered() {
        let mut config = TransportConfig::default();
        config.retransmit_base = Duration::from_millis(50);
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);

        a.enqueue_payload(0, vec![1].into(), DeliveryMode::ReliableOrdered, now).unwrap();
        // Simulate loss: encode and discard.
        let lost = a.encode_pending(now);
        assert_eq!(lost.len(), 1);

        // Before the base interval nothing is due.
        a.update(now + Duration::from_millis(10));
        assert!(!a.has_pending());

        // After it, the payload is re-queued and delivery succeeds.
        let later = now + Duration::from_millis(60);
        a.update(later);
        assert!(a.has_pending());
        let delivered = pump(&mut a, &mut b, later);
        assert_eq!(delivered.len(), 1);
        assert_eq!(a.statistics().retransmissions(), 1);
    }

    #[test]
    fn exhausted_retransmissions_fail_the_link() {
        let mut config = TransportConfig::default();
        config.retransmit_base = Duration::from_millis(10);
        config.max_retransmit_attempts = 2;
        let now = Instant::now();
        let mut a = Link::new(addr(), &config, now);

        a.enqueue_payload(0, vec![1].into(), DeliveryMode::ReliableUnordered, now).unwrap();
        a.encode_pending(now);

        let mut when = now;
        for _ in 0..4 {
            when += Duration::from_secs(5);
            a.update(when);
            a.encode_pending(when);
        }
        assert!(a.is_failed());
        assert!(a.should_close(when));
    }

    #[test]
    fn out_of_order_arrivals_release_in_order() {
        let config = TransportConfig::default();
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);

        // Flush after each enqueue so every payload rides its own datagram.
        let mut singles = Vec::new();
        for value in 0u8..3 {
            a.enqueue_payload(2, vec![value].into(), DeliveryMode::ReliableOrdered, now).unwrap();
            singles.extend(a.encode_pending(now));
        }
        assert_eq!(singles.len(), 3);

        let second = b.process_datagram(&singles[1], now).unwrap();
        assert!(second.is_empty());
        let third = b.process_datagram(&singles[2], now).unwrap();
        assert!(third.is_empty());
        let first = b.process_datagram(&singles[0], now).unwrap();
        let payloads: Vec<u8> = first.iter().map(|d| d.data.as_slice()[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2]);
    }

    #[test]
    fn out_of_window_arrival_requests_resend() {
        let mut config = TransportConfig::default();
        config.reorder_window = 2;
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);

        let mut singles = Vec::new();
        for value in 0u8..4 {
            a.enqueue_payload(0, vec![value].into(), DeliveryMode::ReliableOrdered, now).unwrap();
            singles.extend(a.encode_pending(now));
        }

        // Sequence 2 is outside the window [0, 2) while 0 is missing.
        let dropped = b.process_datagram(&singles[2], now).unwrap();
        assert!(dropped.is_empty());
        assert_eq!(b.statistics().resend_requests(), 1);

        // B's resend request reaches A and expedites sequence 0.
        pump(&mut b, &mut a, now);
        a.update(now);
        assert!(a.has_pending());
        let recovered = pump(&mut a, &mut b, now);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].data.as_slice(), &[0]);
    }

    #[test]
    fn heartbeat_only_when_both_directions_idle() {
        let mut config = TransportConfig::default();
        config.heartbeat_interval = Some(Duration::from_millis(50));
        let now = Instant::now();
        let mut link = Link::new(addr(), &config, now);
        link.record_send();
        link.record_recv();

        // Recently heard: no ping.
        link.last_sent = now - Duration::from_millis(60);
        link.last_heard = now - Duration::from_millis(10);
        link.update(now);
        assert!(!link.has_pending());

        // Both idle: ping.
        link.last_heard = now - Duration::from_millis(60);
        link.update(now);
        let frames = link.encode_pending(now);
        assert_eq!(frames.len(), 1);
        let frame = FrameDecoder::decode_frame(&frames[0]).unwrap();
        assert!(matches!(frame.commands[0], FrameCommand::Ping { .. }));
    }

    #[test]
    fn pong_produces_rtt_sample() {
        let mut config = TransportConfig::default();
        config.heartbeat_interval = Some(Duration::from_millis(10));
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);
        a.record_send();
        a.record_recv();
        b.record_send();
        b.record_recv();

        a.last_sent = now - Duration::from_millis(20);
        a.last_heard = now - Duration::from_millis(20);
        a.update(now);
        let ping_at = now;
        pump(&mut a, &mut b, ping_at);

        let pong_at = now + Duration::from_millis(30);
        pump(&mut b, &mut a, pong_at);
        assert_eq!(a.rtt(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let config = TransportConfig::default();
        let now = Instant::now();
        let mut link = Link::new(addr(), &config, now);
        let oversized = vec![0u8; config.max_payload_size + 1];
        let err = link
            .enqueue_payload(0, oversized.into(), DeliveryMode::Unreliable, now)
            .unwrap_err();
        assert!(matches!(err, ErrorKind::PayloadTooLarge { .. }));
    }

    #[test]
    fn disconnect_flushes_then_closes() {
        let config = TransportConfig::default();
        let now = Instant::now();
        let mut link = Link::new(addr(), &config, now);
        link.disconnect();
        assert_eq!(link.state(), LinkState::Disconnecting);
        assert!(!link.should_close(now));
        link.encode_pending(now);
        assert!(link.should_close(now));
    }

    #[test]
    fn remote_disconnect_closes_link() {
        let config = TransportConfig::default();
        let now = Instant::now();
        let (mut a, mut b) = pair(&config, now);
        a.disconnect();
        pump(&mut a, &mut b, now);
        assert_eq!(b.state(), LinkState::Closed);
        assert!(b.should_close(now));
    }
}
