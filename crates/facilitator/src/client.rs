//! Client-side session API.
//!
//! A [`FacilitatorClient`] owns one UDP host, keeps a reliable-ordered
//! control link to the facilitator, executes the hole-punch protocol when
//! the server hands it a peer's candidates, and routes peer traffic over
//! whichever path was established. Consumers only see [`ClientEvent`]s.

use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{Duration, Instant},
};

use facilitator_core::{
    config::TransportConfig,
    constants::CONTROL_CHANNEL,
    error::{ErrorKind, Result},
    interceptor::Interceptor,
    shared::SharedBytes,
};
use facilitator_host::{Host, TransportEvent};
use facilitator_protocol::{
    codec::MessageCodec,
    message::{
        ChannelId, DenyReason, LinkFailReason, Message, RoomFilter, RoomId, RoomSummary,
        RoomTarget, SessionId, Visibility,
    },
    packet::{DeliveryMode, Packet},
};
use tracing::{debug, trace, warn};

/// Transport channel for payloads on established direct peer links.
const PEER_CHANNEL: u8 = 1;

/// Client knobs. The punch timings must agree with the server's deployment
/// configuration for the negotiation windows to line up.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Transport tuning for every link the client maintains.
    pub transport: TransportConfig,
    /// How long to keep punching before reporting failure.
    pub punch_window: Duration,
    /// Cadence of probe bursts within the window.
    pub punch_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            punch_window: Duration::from_secs(3),
            punch_interval: Duration::from_millis(150),
        }
    }
}

/// How a peer is currently reachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerPath {
    /// Straight across the network, facilitator out of the path.
    Direct(SocketAddr),
    /// Through the facilitator's relay on this channel.
    Relayed(ChannelId),
}

#[derive(Debug)]
struct PendingPunch {
    candidates: Vec<SocketAddr>,
    deadline: Instant,
    next_probe: Instant,
    reported: bool,
}

/// Events surfaced to the consuming application.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server accepted registration.
    Registered(SessionId),
    /// The server refused registration.
    RegistrationDenied(DenyReason),
    /// A room was created for us.
    RoomCreated(RoomId),
    /// We joined a room.
    RoomJoined {
        /// The room.
        room_id: RoomId,
        /// Members present before us, in join order.
        members: Vec<SessionId>,
    },
    /// A room request was refused.
    RequestDenied(DenyReason),
    /// We left the room.
    RoomLeft,
    /// Room listing arrived.
    RoomList(Vec<RoomSummary>),
    /// A peer is reachable directly.
    PeerDirect(SessionId),
    /// A peer is reachable through the relay.
    PeerRelayed(SessionId),
    /// Payload from a peer.
    Data {
        /// Sending peer.
        from: SessionId,
        /// Payload bytes.
        payload: SharedBytes,
        /// Delivery mode the sender used.
        mode: DeliveryMode,
    },
    /// The link to a peer failed.
    LinkFailed {
        /// The peer.
        peer: SessionId,
        /// Why.
        reason: LinkFailReason,
    },
    /// The control link to the server is gone.
    ServerLost,
}

/// Session-layer client for the facilitator service.
pub struct FacilitatorClient {
    host: Host,
    server: SocketAddr,
    session_id: Option<SessionId>,
    room: Option<RoomId>,
    peers: HashMap<SessionId, PeerPath>,
    peer_addrs: HashMap<SocketAddr, SessionId>,
    channel_peers: HashMap<ChannelId, SessionId>,
    punches: HashMap<SessionId, PendingPunch>,
    relay_seqs: HashMap<ChannelId, u32>,
    config: ClientConfig,
}

impl std::fmt::Debug for FacilitatorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorClient")
            .field("server", &self.server)
            .field("session_id", &self.session_id)
            .field("room", &self.room)
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl FacilitatorClient {
    /// Connects to a facilitator and sends the registration request.
    pub fn connect(server: SocketAddr, token: &str) -> Result<Self> {
        Self::connect_with(server, token, ClientConfig::default(), None)
    }

    /// Connects with explicit configuration and an optional interceptor
    /// (tests use the interceptor to sever peer-to-peer paths).
    pub fn connect_with(
        server: SocketAddr,
        token: &str,
        config: ClientConfig,
        interceptor: Option<Box<dyn Interceptor>>,
    ) -> Result<Self> {
        let host = match interceptor {
            Some(interceptor) => Host::bind_with_interceptor(
                "0.0.0.0:0",
                config.transport.clone(),
                interceptor,
            )?,
            None => Host::bind_with_config("0.0.0.0:0", config.transport.clone())?,
        };
        let mut client = FacilitatorClient {
            host,
            server,
            session_id: None,
            room: None,
            peers: HashMap::new(),
            peer_addrs: HashMap::new(),
            channel_peers: HashMap::new(),
            punches: HashMap::new(),
            relay_seqs: HashMap::new(),
            config,
        };
        // A wildcard bind gives no usable candidate to declare; the server
        // still reflects our public address from the packet source.
        let local = client.host.local_addr()?;
        let local_endpoints =
            if local.ip().is_unspecified() { Vec::new() } else { vec![local] };
        client.send_control(&Message::Register { token: token.to_owned(), local_endpoints });
        Ok(client)
    }

    /// Our session id, once registered.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// The room we are in, if any.
    pub fn room(&self) -> Option<RoomId> {
        self.room
    }

    /// How a peer is reachable right now, if at all.
    pub fn peer_path(&self, peer: SessionId) -> Option<PeerPath> {
        self.peers.get(&peer).copied()
    }

    /// The client's bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.host.local_addr()
    }

    /// Asks the server to create a room.
    pub fn create_room(
        &mut self,
        name: &str,
        capacity: u16,
        visibility: Visibility,
        password: Option<&str>,
    ) {
        self.send_control(&Message::CreateRoom {
            name: name.to_owned(),
            capacity,
            visibility,
            password: password.map(str::to_owned),
        });
    }

    /// Asks the server to join a room.
    pub fn join_room(&mut self, target: RoomTarget, password: Option<&str>) {
        self.send_control(&Message::JoinRoom { target, password: password.map(str::to_owned) });
    }

    /// Joins any public room with free capacity.
    pub fn join_any(&mut self) {
        self.join_room(RoomTarget::Match { name: None }, None);
    }

    /// Leaves the current room.
    pub fn leave_room(&mut self) {
        self.send_control(&Message::LeaveRoom);
    }

    /// Requests a room listing.
    pub fn list_rooms(&mut self, filter: RoomFilter) {
        self.send_control(&Message::ListRooms { filter });
    }

    /// Sends a payload to a room peer with the requested delivery mode,
    /// routing over the direct path or the relay as established.
    pub fn send_to_peer(
        &mut self,
        peer: SessionId,
        payload: impl Into<SharedBytes>,
        mode: DeliveryMode,
    ) -> Result<()> {
        let payload = payload.into();
        match self.peers.get(&peer) {
            Some(PeerPath::Direct(addr)) => {
                let bytes = MessageCodec::encode(&Message::PeerPayload { payload });
                let addr = *addr;
                self.host.send(Self::packet_for(mode, addr, bytes, PEER_CHANNEL));
                Ok(())
            }
            Some(PeerPath::Relayed(channel_id)) => {
                let channel_id = *channel_id;
                let seq = self.relay_seqs.entry(channel_id).or_insert(0);
                let sequence = *seq;
                *seq = seq.wrapping_add(1);
                let bytes = MessageCodec::encode(&Message::RelayData {
                    channel_id,
                    sequence,
                    mode,
                    payload,
                });
                let server = self.server;
                self.host
                    .send(Self::packet_for(mode, server, bytes, channel_id.transport_channel()));
                Ok(())
            }
            None => Err(ErrorKind::PeerUnreachable),
        }
    }

    /// Polls the transport and runs punch timers, returning surfaced events.
    pub fn poll(&mut self, now: Instant) -> Vec<ClientEvent> {
        self.host.manual_poll(now);
        let mut events = Vec::new();
        while let Some(event) = self.host.recv() {
            self.handle_transport_event(event, now, &mut events);
        }
        self.punch_tick(now);
        events
    }

    fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
        events: &mut Vec<ClientEvent>,
    ) {
        match event {
            TransportEvent::Packet(packet) => {
                let addr = packet.addr();
                let mode = packet.mode();
                match MessageCodec::decode(packet.payload()) {
                    Ok(message) if addr == self.server => {
                        self.handle_server_message(message, now, events)
                    }
                    Ok(message) => self.handle_peer_message(addr, mode, message, events),
                    Err(err) => warn!("undecodable message from {}: {}", addr, err),
                }
            }
            TransportEvent::Connected(addr) => trace!("transport established with {}", addr),
            TransportEvent::Timeout(addr) => debug!("transport timeout for {}", addr),
            TransportEvent::Disconnected(addr) => {
                if addr == self.server {
                    events.push(ClientEvent::ServerLost);
                } else if let Some(peer) = self.peer_addrs.remove(&addr) {
                    self.peers.remove(&peer);
                    events.push(ClientEvent::LinkFailed {
                        peer,
                        reason: LinkFailReason::PeerExpired,
                    });
                }
            }
        }
    }

    fn handle_server_message(
        &mut self,
        message: Message,
        now: Instant,
        events: &mut Vec<ClientEvent>,
    ) {
        match message {
            Message::RegisterAck { session_id } => {
                self.session_id = Some(session_id);
                events.push(ClientEvent::Registered(session_id));
            }
            Message::AuthDenied { reason } => {
                events.push(ClientEvent::RegistrationDenied(reason));
            }
            Message::RoomCreated { room_id } => events.push(ClientEvent::RoomCreated(room_id)),
            Message::RoomJoined { room_id, members } => {
                self.room = Some(room_id);
                events.push(ClientEvent::RoomJoined { room_id, members });
            }
            Message::RequestDenied { reason } => {
                events.push(ClientEvent::RequestDenied(reason));
            }
            Message::RoomLeft => {
                self.room = None;
                self.clear_peer_state();
                events.push(ClientEvent::RoomLeft);
            }
            Message::RoomList { rooms } => events.push(ClientEvent::RoomList(rooms)),
            Message::CandidateExchange { peer_session, endpoints, initiator } => {
                self.start_punch(peer_session, &endpoints, initiator, now);
            }
            Message::RelayEstablished { peer_session, channel_id } => {
                // The server's promotion wins over any direct path a late
                // punch ack may have recorded for this peer.
                self.punches.remove(&peer_session);
                self.peer_addrs.retain(|_, peer| *peer != peer_session);
                self.peers.insert(peer_session, PeerPath::Relayed(channel_id));
                self.channel_peers.insert(channel_id, peer_session);
                events.push(ClientEvent::PeerRelayed(peer_session));
            }
            Message::RelayData { channel_id, sequence: _, mode, payload } => {
                if let Some(peer) = self.channel_peers.get(&channel_id) {
                    events.push(ClientEvent::Data { from: *peer, payload, mode });
                } else {
                    trace!("relay payload on unknown channel {}", channel_id);
                }
            }
            Message::LinkFailed { peer_session, reason } => {
                self.forget_peer(peer_session);
                events.push(ClientEvent::LinkFailed { peer: peer_session, reason });
            }
            other => warn!("unexpected server message kind {:?}", other.kind()),
        }
    }

    fn handle_peer_message(
        &mut self,
        addr: SocketAddr,
        mode: DeliveryMode,
        message: Message,
        events: &mut Vec<ClientEvent>,
    ) {
        match message {
            Message::PunchProbe { from_session } => {
                trace!("punch probe from {} at {}", from_session, addr);
                if let Some(me) = self.session_id {
                    let bytes = MessageCodec::encode(&Message::PunchAck { from_session: me });
                    self.host.send(Packet::unreliable(addr, bytes, CONTROL_CHANNEL));
                }
            }
            Message::PunchAck { from_session } => {
                self.on_punch_success(from_session, addr, events);
            }
            Message::PeerPayload { payload } => {
                if let Some(peer) = self.peer_addrs.get(&addr) {
                    events.push(ClientEvent::Data { from: *peer, payload, mode });
                } else {
                    trace!("payload from unknown peer address {}", addr);
                }
            }
            other => warn!("unexpected peer message kind {:?} from {}", other.kind(), addr),
        }
    }

    /// Begins (or restarts) punching toward a peer's candidate set.
    ///
    /// The non-initiating side waits half a probe interval so the
    /// deterministic opener goes first on strict NATs.
    fn start_punch(
        &mut self,
        peer: SessionId,
        endpoints: &[facilitator_protocol::message::Endpoint],
        initiator: bool,
        now: Instant,
    ) {
        let candidates: Vec<SocketAddr> = endpoints.iter().map(|e| e.addr).collect();
        debug!("punching {} candidate(s) for peer {}", candidates.len(), peer);
        self.peers.remove(&peer);
        let first_probe =
            if initiator { now } else { now + self.config.punch_interval / 2 };
        self.punches.insert(peer, PendingPunch {
            candidates,
            deadline: now + self.config.punch_window,
            next_probe: first_probe,
            reported: false,
        });
    }

    /// First successful bidirectional acknowledgment wins: adopt the path,
    /// cancel the remaining candidates, and report upstream.
    fn on_punch_success(
        &mut self,
        peer: SessionId,
        addr: SocketAddr,
        events: &mut Vec<ClientEvent>,
    ) {
        if self.punches.remove(&peer).is_none() {
            // Late ack after promotion; the path is already decided.
            return;
        }
        self.peers.insert(peer, PeerPath::Direct(addr));
        self.peer_addrs.insert(addr, peer);
        self.send_control(&Message::PunchReport { peer_session: peer, succeeded: Some(addr) });
        events.push(ClientEvent::PeerDirect(peer));
    }

    fn punch_tick(&mut self, now: Instant) {
        let Some(me) = self.session_id else { return };
        let mut reports = Vec::new();
        let mut probes = Vec::new();

        for (peer, punch) in self.punches.iter_mut() {
            if now >= punch.deadline {
                if !punch.reported {
                    punch.reported = true;
                    reports.push(*peer);
                }
                continue;
            }
            if now >= punch.next_probe {
                punch.next_probe = now + self.config.punch_interval;
                probes.extend(punch.candidates.iter().copied());
            }
        }

        for addr in probes {
            let bytes = MessageCodec::encode(&Message::PunchProbe { from_session: me });
            self.host.send(Packet::unreliable(addr, bytes, CONTROL_CHANNEL));
        }
        for peer in reports {
            debug!("punch window for peer {} expired", peer);
            self.send_control(&Message::PunchReport { peer_session: peer, succeeded: None });
        }
    }

    fn forget_peer(&mut self, peer: SessionId) {
        self.punches.remove(&peer);
        if let Some(path) = self.peers.remove(&peer) {
            match path {
                PeerPath::Direct(addr) => {
                    self.peer_addrs.remove(&addr);
                }
                PeerPath::Relayed(channel) => {
                    self.channel_peers.remove(&channel);
                    self.relay_seqs.remove(&channel);
                }
            }
        }
    }

    fn clear_peer_state(&mut self) {
        self.peers.clear();
        self.peer_addrs.clear();
        self.channel_peers.clear();
        self.punches.clear();
        self.relay_seqs.clear();
    }

    fn send_control(&mut self, message: &Message) {
        let bytes = MessageCodec::encode(message);
        let server = self.server;
        self.host.send(Packet::reliable_ordered(server, bytes, CONTROL_CHANNEL));
    }

    fn packet_for(mode: DeliveryMode, addr: SocketAddr, bytes: Vec<u8>, channel: u8) -> Packet {
        match mode {
            DeliveryMode::Unreliable => Packet::unreliable(addr, bytes, channel),
            DeliveryMode::ReliableUnordered => Packet::reliable_unordered(addr, bytes, channel),
            DeliveryMode::ReliableOrdered => Packet::reliable_ordered(addr, bytes, channel),
        }
    }
}
