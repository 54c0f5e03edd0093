//! Relay engine: stateful forwarding for pairs that could not connect
//! directly.
//!
//! Each relayed pairing gets a channel with two legs. A payload arriving on
//! one leg is re-framed toward the other under that leg's own forwarding
//! sequence, so the legs keep independent retransmission histories and a
//! stall on one cannot block delivery ordering on the other.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use facilitator_core::{
    error::{ErrorKind, Result},
    shared::SharedBytes,
};
use facilitator_protocol::{
    message::{ChannelId, Message, SessionId},
    packet::DeliveryMode,
};

use crate::rendezvous::LinkId;

const QUOTA_WINDOW: Duration = Duration::from_secs(1);

/// Sliding one-second byte/datagram budget for a channel.
#[derive(Debug)]
struct RelayQuota {
    window_start: Instant,
    bytes_this_window: u32,
    datagrams_this_window: u32,
    bytes_limit: u32,
    datagrams_limit: u32,
}

impl RelayQuota {
    fn new(bytes_limit: u32, datagrams_limit: u32, now: Instant) -> Self {
        Self {
            window_start: now,
            bytes_this_window: 0,
            datagrams_this_window: 0,
            bytes_limit,
            datagrams_limit,
        }
    }

    /// Resets counters when the window has rolled over.
    fn roll_window(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= QUOTA_WINDOW {
            self.bytes_this_window = 0;
            self.datagrams_this_window = 0;
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// True if one more datagram of `bytes` fits this window. 0 = unlimited.
    fn admits(&self, bytes: usize) -> bool {
        let bytes_ok = self.bytes_limit == 0
            || self.bytes_this_window.saturating_add(bytes as u32) <= self.bytes_limit;
        let datagrams_ok =
            self.datagrams_limit == 0 || self.datagrams_this_window < self.datagrams_limit;
        bytes_ok && datagrams_ok
    }

    fn record(&mut self, bytes: usize) {
        self.bytes_this_window = self.bytes_this_window.saturating_add(bytes as u32);
        self.datagrams_this_window = self.datagrams_this_window.saturating_add(1);
    }
}

/// One direction of a relay channel: state for traffic flowing *toward*
/// `session`.
#[derive(Debug)]
struct RelayLeg {
    session: SessionId,
    forward_seq: u32,
    backlog: VecDeque<(DeliveryMode, SharedBytes)>,
}

impl RelayLeg {
    fn new(session: SessionId) -> Self {
        Self { session, forward_seq: 0, backlog: VecDeque::new() }
    }
}

/// Live forwarding state for one relayed pairing.
#[derive(Debug)]
pub struct RelayChannel {
    /// Channel id carried in `RelayData`.
    pub id: ChannelId,
    /// The pairing this channel serves.
    pub link: LinkId,
    legs: [RelayLeg; 2],
    quota: RelayQuota,
}

impl RelayChannel {
    /// The two sessions this channel connects.
    pub fn sessions(&self) -> (SessionId, SessionId) {
        (self.legs[0].session, self.legs[1].session)
    }
}

/// What happened to a forwarded payload.
#[derive(Debug, PartialEq)]
pub enum Forward {
    /// Deliver this message to the destination session.
    Deliver {
        /// Destination session.
        to: SessionId,
        /// Re-framed relay message.
        message: Message,
    },
    /// Over quota; reliable payload parked in the bounded backlog.
    Queued,
    /// Dropped: over quota (unreliable), backlog full, or channel gone.
    Dropped,
}

/// The single owned table of relay channels.
pub struct RelayEngine {
    channels: HashMap<ChannelId, RelayChannel>,
    by_link: HashMap<LinkId, ChannelId>,
    next_channel: u64,
    max_channels: usize,
    bytes_limit: u32,
    datagrams_limit: u32,
    backlog_limit: usize,
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine").field("channels", &self.channels.len()).finish()
    }
}

impl RelayEngine {
    /// Creates an engine with the given cap and per-channel quota.
    pub fn new(
        max_channels: usize,
        bytes_limit: u32,
        datagrams_limit: u32,
        backlog_limit: usize,
    ) -> Self {
        Self {
            channels: HashMap::new(),
            by_link: HashMap::new(),
            next_channel: 1,
            max_channels,
            bytes_limit,
            datagrams_limit,
            backlog_limit,
        }
    }

    /// Opens a channel for a pairing. Fails with `CapacityError` at the cap.
    pub fn open(
        &mut self,
        link: LinkId,
        a: SessionId,
        b: SessionId,
        now: Instant,
    ) -> Result<ChannelId> {
        if let Some(existing) = self.by_link.get(&link) {
            return Ok(*existing);
        }
        if self.channels.len() >= self.max_channels {
            return Err(ErrorKind::CapacityError("relay channels"));
        }
        let id = ChannelId(self.next_channel);
        self.next_channel += 1;
        self.channels.insert(id, RelayChannel {
            id,
            link,
            legs: [RelayLeg::new(a), RelayLeg::new(b)],
            quota: RelayQuota::new(self.bytes_limit, self.datagrams_limit, now),
        });
        self.by_link.insert(link, id);
        Ok(id)
    }

    /// Forwards one payload arriving from `from`. A missing channel is a
    /// concurrent teardown, answered with `Dropped` rather than an error.
    pub fn forward(
        &mut self,
        channel_id: ChannelId,
        from: SessionId,
        mode: DeliveryMode,
        payload: SharedBytes,
        now: Instant,
    ) -> Forward {
        let backlog_limit = self.backlog_limit;
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            return Forward::Dropped;
        };
        let (a, b) = channel.sessions();
        let dest_index = if from == a {
            1
        } else if from == b {
            0
        } else {
            return Forward::Dropped;
        };

        channel.quota.roll_window(now);
        if !channel.quota.admits(payload.len()) {
            if mode.is_reliable() && channel.legs[dest_index].backlog.len() < backlog_limit {
                channel.legs[dest_index].backlog.push_back((mode, payload));
                return Forward::Queued;
            }
            return Forward::Dropped;
        }

        channel.quota.record(payload.len());
        let leg = &mut channel.legs[dest_index];
        let sequence = leg.forward_seq;
        leg.forward_seq = leg.forward_seq.wrapping_add(1);
        Forward::Deliver {
            to: leg.session,
            message: Message::RelayData { channel_id, sequence, mode, payload },
        }
    }

    /// Flushes backlogged reliable payloads that now fit their quota.
    pub fn drain_backlogs(&mut self, now: Instant) -> Vec<(SessionId, Message)> {
        let mut out = Vec::new();
        for channel in self.channels.values_mut() {
            channel.quota.roll_window(now);
            for leg_index in 0..channel.legs.len() {
                while let Some((mode, payload)) = channel.legs[leg_index].backlog.pop_front() {
                    if !channel.quota.admits(payload.len()) {
                        channel.legs[leg_index].backlog.push_front((mode, payload));
                        break;
                    }
                    channel.quota.record(payload.len());
                    let leg = &mut channel.legs[leg_index];
                    let sequence = leg.forward_seq;
                    leg.forward_seq = leg.forward_seq.wrapping_add(1);
                    out.push((
                        leg.session,
                        Message::RelayData { channel_id: channel.id, sequence, mode, payload },
                    ));
                }
            }
        }
        out
    }

    /// Tears down the channel of a pairing, freeing buffers immediately.
    pub fn close_link(&mut self, link: LinkId) -> Option<RelayChannel> {
        let id = self.by_link.remove(&link)?;
        self.channels.remove(&id)
    }

    /// Tears down every channel touching a session, returning them.
    pub fn close_for_session(&mut self, session: SessionId) -> Vec<RelayChannel> {
        let links: Vec<LinkId> = self
            .channels
            .values()
            .filter(|channel| {
                let (a, b) = channel.sessions();
                a == session || b == session
            })
            .map(|channel| channel.link)
            .collect();
        links.into_iter().filter_map(|link| self.close_link(link)).collect()
    }

    /// Borrows one channel.
    pub fn channel(&self, id: ChannelId) -> Option<&RelayChannel> {
        self.channels.get(&id)
    }

    /// Number of open channels.
    pub fn channels_count(&self) -> usize {
        self.channels.len()
    }
}
