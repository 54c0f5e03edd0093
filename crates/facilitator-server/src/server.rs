use std::{
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    thread::sleep,
    time::{Duration, Instant},
};

use facilitator_core::{
    config::FacilitatorConfig,
    constants::CONTROL_CHANNEL,
    error::{ErrorKind, Result},
    shared::SharedBytes,
};
use facilitator_host::{Clock, Host, SystemClock, TransportEvent};
use facilitator_protocol::{
    codec::MessageCodec,
    message::{
        ChannelId, DenyReason, LinkFailReason, Message, RoomTarget, SessionId,
    },
    packet::{DeliveryMode, Packet},
};
use tracing::{debug, info, trace, warn};

use crate::{
    registry::{AcceptNonEmpty, SessionRegistry, TokenValidator},
    relay::{Forward, RelayEngine},
    rendezvous::{LinkId, PeerLink, PeerLinkState, RendezvousCoordinator, ReportOutcome},
    rooms::{RoomConfig, RoomDirectory},
};

/// The facilitator service: one UDP endpoint binding the session registry,
/// room directory, rendezvous coordinator, and relay engine together.
///
/// Every table is owned here and touched only from the poll task; clients
/// interact purely through the wire protocol.
pub struct Facilitator {
    host: Host,
    config: FacilitatorConfig,
    registry: SessionRegistry,
    rooms: RoomDirectory,
    rendezvous: RendezvousCoordinator,
    relay: RelayEngine,
    last_sweep: Instant,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Facilitator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facilitator")
            .field("sessions", &self.registry.len())
            .field("rooms", &self.rooms.len())
            .field("peer_links", &self.rendezvous.links_count())
            .field("relay_channels", &self.relay.channels_count())
            .finish()
    }
}

impl Facilitator {
    /// Binds the service to the given address.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: FacilitatorConfig) -> Result<Self> {
        let host = Host::bind_with_config(addresses, config.transport.clone())?;
        Ok(Self::from_host(host, config, Box::new(AcceptNonEmpty)))
    }

    /// Binds to an ephemeral localhost port; used by tests and demos.
    pub fn bind_any(config: FacilitatorConfig) -> Result<Self> {
        let host = Host::bind_any_with_config(config.transport.clone())?;
        Ok(Self::from_host(host, config, Box::new(AcceptNonEmpty)))
    }

    /// Binds with a custom token validator.
    pub fn bind_with_validator<A: ToSocketAddrs>(
        addresses: A,
        config: FacilitatorConfig,
        validator: Box<dyn TokenValidator>,
    ) -> Result<Self> {
        let host = Host::bind_with_config(addresses, config.transport.clone())?;
        Ok(Self::from_host(host, config, validator))
    }

    /// Builds the service around an existing host.
    pub fn from_host(
        host: Host,
        config: FacilitatorConfig,
        validator: Box<dyn TokenValidator>,
    ) -> Self {
        let registry = SessionRegistry::new(config.max_sessions, validator);
        let rooms = RoomDirectory::new(config.max_rooms, config.max_room_capacity);
        let rendezvous = RendezvousCoordinator::new(config.punch_window, config.link_retry_cap);
        let relay = RelayEngine::new(
            config.max_relay_channels,
            config.relay_bytes_per_sec,
            config.relay_datagrams_per_sec,
            config.relay_backlog_limit,
        );
        Facilitator {
            host,
            config,
            registry,
            rooms,
            rendezvous,
            relay,
            last_sweep: Instant::now(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Local address the service is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.host.local_addr()
    }

    /// The service configuration.
    pub fn config(&self) -> &FacilitatorConfig {
        &self.config
    }

    /// Runs the service until the process exits.
    pub fn run(mut self) -> ! {
        info!("facilitator running");
        loop {
            let now = self.clock.now();
            self.manual_poll(now);
            sleep(Duration::from_millis(1));
        }
    }

    /// One poll pass: drain transport events, dispatch messages, run timers.
    pub fn manual_poll(&mut self, now: Instant) {
        self.host.manual_poll(now);
        while let Some(event) = self.host.recv() {
            self.handle_event(event, now);
        }
        self.tick(now);
    }

    fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Packet(packet) => {
                let addr = packet.addr();
                self.registry.touch(addr, now);
                match MessageCodec::decode(packet.payload()) {
                    Ok(message) => self.dispatch(addr, message, now),
                    Err(err) => warn!("undecodable message from {}: {}", addr, err),
                }
            }
            TransportEvent::Connected(addr) => trace!("transport established with {}", addr),
            TransportEvent::Timeout(addr) => debug!("transport timeout for {}", addr),
            TransportEvent::Disconnected(addr) => {
                if let Some(id) = self.registry.id_by_addr(addr) {
                    info!("session {} lost its transport", id);
                    self.drop_session(id, LinkFailReason::PeerExpired, now);
                }
            }
        }
    }

    fn dispatch(&mut self, addr: SocketAddr, message: Message, now: Instant) {
        match message {
            Message::Register { token, local_endpoints } => {
                self.on_register(addr, token, local_endpoints, now)
            }
            Message::CreateRoom { name, capacity, visibility, password } => {
                let Some(id) = self.require_session(addr) else { return };
                let config = RoomConfig { name, capacity, visibility, password };
                match self.rooms.create(config, now) {
                    Ok(room_id) => {
                        info!("session {} created room {}", id, room_id);
                        self.send_control(addr, &Message::RoomCreated { room_id });
                    }
                    Err(err) => self.deny(addr, &err),
                }
            }
            Message::JoinRoom { target, password } => {
                self.on_join(addr, target, password, now)
            }
            Message::LeaveRoom => {
                let Some(id) = self.require_session(addr) else { return };
                self.leave_room(id, now);
                self.send_control(addr, &Message::RoomLeft);
            }
            Message::ListRooms { filter } => {
                let Some(_) = self.require_session(addr) else { return };
                let rooms = self.rooms.list(&filter);
                self.send_control(addr, &Message::RoomList { rooms });
            }
            Message::PunchReport { peer_session, succeeded } => {
                let Some(id) = self.require_session(addr) else { return };
                self.on_punch_report(id, peer_session, succeeded, now);
            }
            Message::RelayData { channel_id, sequence: _, mode, payload } => {
                let Some(id) = self.require_session(addr) else { return };
                self.on_relay_data(id, channel_id, mode, payload, now);
            }
            other => {
                // Peer-to-peer and server-originated kinds have no business here.
                warn!("unexpected {:?} from {}", other.kind(), addr);
            }
        }
    }

    fn on_register(
        &mut self,
        addr: SocketAddr,
        token: String,
        local_endpoints: Vec<SocketAddr>,
        now: Instant,
    ) {
        let duplicate = self.registry.token_in_use(&token);
        match self.registry.register(&token, addr, local_endpoints, now) {
            Ok(session_id) => {
                info!("session {} registered from {}", session_id, addr);
                self.send_control(addr, &Message::RegisterAck { session_id });
            }
            Err(ErrorKind::CapacityError(_)) => {
                self.send_control(addr, &Message::AuthDenied { reason: DenyReason::Capacity });
            }
            Err(_) => {
                let reason = if duplicate {
                    DenyReason::DuplicateToken
                } else {
                    DenyReason::InvalidToken
                };
                self.send_control(addr, &Message::AuthDenied { reason });
            }
        }
    }

    fn on_join(
        &mut self,
        addr: SocketAddr,
        target: RoomTarget,
        password: Option<String>,
        now: Instant,
    ) {
        let Some(id) = self.require_session(addr) else { return };
        if self.registry.session(id).and_then(|entry| entry.room).is_some() {
            self.deny(addr, &ErrorKind::AlreadyMemberError);
            return;
        }
        match self.rooms.join(id, &target, password.as_deref()) {
            Ok((room_id, members)) => {
                self.registry.set_room(id, Some(room_id));
                info!("session {} joined room {} ({} prior members)", id, room_id, members.len());
                self.send_control(addr, &Message::RoomJoined { room_id, members: members.clone() });
                // Full mesh: one pairing between the joiner and every member.
                for peer in members {
                    self.begin_pairing(id, peer, now);
                }
            }
            Err(err) => self.deny(addr, &err),
        }
    }

    fn begin_pairing(&mut self, a: SessionId, b: SessionId, now: Instant) {
        let link_id = self.rendezvous.create_link(a, b, now);
        debug!("pairing {} between {} and {}", link_id, a, b);
        self.send_candidates(link_id);
    }

    /// Sends each side the other's candidate set, opening the punch window.
    fn send_candidates(&mut self, link_id: LinkId) {
        let Some(link) = self.rendezvous.link(link_id) else { return };
        let (a, b) = (link.a, link.b);
        let initiator = link.initiator();
        let exchanges = [
            (a, b, self.registry.candidates(b)),
            (b, a, self.registry.candidates(a)),
        ];
        for (to, peer, endpoints) in exchanges {
            if endpoints.is_empty() {
                continue;
            }
            self.notify(to, &Message::CandidateExchange {
                peer_session: peer,
                endpoints,
                initiator: to == initiator,
            });
        }
    }

    fn on_punch_report(
        &mut self,
        reporter: SessionId,
        peer: SessionId,
        succeeded: Option<SocketAddr>,
        now: Instant,
    ) {
        match self.rendezvous.record_report(reporter, peer, succeeded) {
            Some((link_id, ReportOutcome::DirectConfirmed)) => {
                self.rendezvous.mark_direct(link_id, now);
                info!("pairing {} went direct", link_id);
            }
            Some((link_id, ReportOutcome::PunchFailed)) => {
                debug!("pairing {} punch failed on report", link_id);
                self.promote_to_relay(link_id, now);
            }
            Some((_, ReportOutcome::Pending)) => {}
            None => trace!("punch report for unknown pairing from {}", reporter),
        }
    }

    /// Moves a pairing onto the relay, or renegotiates/fails when the relay
    /// is out of capacity.
    fn promote_to_relay(&mut self, link_id: LinkId, now: Instant) {
        let Some(link) = self.rendezvous.link(link_id) else { return };
        let (a, b) = (link.a, link.b);
        match self.relay.open(link_id, a, b, now) {
            Ok(channel_id) => {
                self.rendezvous.mark_relayed(link_id, now);
                info!("pairing {} relayed on channel {}", link_id, channel_id);
                self.notify(a, &Message::RelayEstablished { peer_session: b, channel_id });
                self.notify(b, &Message::RelayEstablished { peer_session: a, channel_id });
            }
            Err(err) => {
                warn!("relay setup for pairing {} failed: {}", link_id, err);
                if self.rendezvous.renegotiate(link_id, now) {
                    self.send_candidates(link_id);
                } else {
                    self.rendezvous.mark_failed(link_id, now);
                    self.notify(a, &Message::LinkFailed {
                        peer_session: b,
                        reason: LinkFailReason::RelayCapacity,
                    });
                    self.notify(b, &Message::LinkFailed {
                        peer_session: a,
                        reason: LinkFailReason::RelayCapacity,
                    });
                }
            }
        }
    }

    fn on_relay_data(
        &mut self,
        from: SessionId,
        channel_id: ChannelId,
        mode: DeliveryMode,
        payload: SharedBytes,
        now: Instant,
    ) {
        match self.relay.forward(channel_id, from, mode, payload, now) {
            Forward::Deliver { to, message } => self.send_relay(to, &message),
            Forward::Queued => trace!("channel {} over quota; payload parked", channel_id),
            Forward::Dropped => trace!("channel {} dropped a payload", channel_id),
        }
    }

    /// Timer pass: liveness refresh + expiry sweep, punch windows, room TTL,
    /// relay backlogs.
    fn tick(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_sweep) >= self.config.sweep_interval {
            self.last_sweep = now;

            // Transport-level liveness (heartbeats included) feeds the registry.
            let addrs: Vec<SocketAddr> =
                self.registry.sessions().map(|entry| entry.addr).collect();
            for addr in addrs {
                if let Some(heard) = self.host.last_heard(addr) {
                    self.registry.touch(addr, heard);
                }
            }

            for entry in self.registry.expire_sweep(now, self.config.session_timeout) {
                info!("session {} expired", entry.id);
                self.cascade_removed(entry.id, entry.room, LinkFailReason::PeerExpired, now);
                self.host.disconnect(entry.addr);
            }

            for room_id in self.rooms.sweep_empty(now, self.config.room_empty_ttl) {
                info!("room {} destroyed after empty grace", room_id);
            }
        }

        for link_id in self.rendezvous.expired(now) {
            debug!("pairing {} punch window expired", link_id);
            self.promote_to_relay(link_id, now);
        }

        for (to, message) in self.relay.drain_backlogs(now) {
            self.send_relay(to, &message);
        }
    }

    /// Removes a session and cascades: room membership, peer links, relay
    /// channels, peer notifications.
    fn drop_session(&mut self, id: SessionId, reason: LinkFailReason, now: Instant) {
        let Some(entry) = self.registry.remove(id) else { return };
        self.cascade_removed(id, entry.room, reason, now);
        self.host.disconnect(entry.addr);
    }

    fn cascade_removed(
        &mut self,
        id: SessionId,
        room: Option<facilitator_protocol::message::RoomId>,
        reason: LinkFailReason,
        now: Instant,
    ) {
        if let Some(room_id) = room {
            self.rooms.leave(id, room_id, now);
        }
        for link in self.rendezvous.teardown_session(id) {
            self.relay.close_link(link.id);
            if let Some(peer) = link.other(id) {
                self.notify(peer, &Message::LinkFailed { peer_session: id, reason });
            }
        }
    }

    fn leave_room(&mut self, id: SessionId, now: Instant) {
        let Some(room_id) = self.registry.session(id).and_then(|entry| entry.room) else {
            return;
        };
        self.rooms.leave(id, room_id, now);
        self.registry.set_room(id, None);
        for link in self.rendezvous.teardown_session(id) {
            self.relay.close_link(link.id);
            if let Some(peer) = link.other(id) {
                self.notify(peer, &Message::LinkFailed {
                    peer_session: id,
                    reason: LinkFailReason::PeerLeft,
                });
            }
        }
        info!("session {} left room {}", id, room_id);
    }

    fn require_session(&self, addr: SocketAddr) -> Option<SessionId> {
        let id = self.registry.id_by_addr(addr);
        if id.is_none() {
            debug!("message from unregistered {}", addr);
        }
        id
    }

    fn deny(&mut self, addr: SocketAddr, err: &ErrorKind) {
        let reason = match err {
            ErrorKind::RoomFullError => DenyReason::RoomFull,
            ErrorKind::RoomNotFoundError => DenyReason::RoomNotFound,
            ErrorKind::AlreadyMemberError => DenyReason::AlreadyMember,
            ErrorKind::BadPasswordError => DenyReason::BadPassword,
            _ => DenyReason::Capacity,
        };
        self.send_control(addr, &Message::RequestDenied { reason });
    }

    fn notify(&mut self, session: SessionId, message: &Message) {
        if let Some(addr) = self.registry.addr_of(session) {
            self.send_control(addr, message);
        }
    }

    fn send_control(&mut self, addr: SocketAddr, message: &Message) {
        let bytes = MessageCodec::encode(message);
        self.host.send(Packet::reliable_ordered(addr, bytes, CONTROL_CHANNEL));
    }

    /// Sends a re-framed relay payload with the sender's end-to-end mode.
    fn send_relay(&mut self, session: SessionId, message: &Message) {
        let Some(addr) = self.registry.addr_of(session) else { return };
        let Message::RelayData { channel_id, mode, .. } = message else { return };
        let bytes = MessageCodec::encode(message);
        let channel = channel_id.transport_channel();
        let packet = match mode {
            DeliveryMode::Unreliable => Packet::unreliable(addr, bytes, channel),
            DeliveryMode::ReliableUnordered => Packet::reliable_unordered(addr, bytes, channel),
            DeliveryMode::ReliableOrdered => Packet::reliable_ordered(addr, bytes, channel),
        };
        self.host.send(packet);
    }

    // ---- introspection for tests and embedding ----

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of rooms (including empty ones in their grace window).
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of open relay channels.
    pub fn relay_channel_count(&self) -> usize {
        self.relay.channels_count()
    }

    /// Number of tracked peer pairings.
    pub fn peer_link_count(&self) -> usize {
        self.rendezvous.links_count()
    }

    /// State of the pairing between two sessions, if tracked.
    pub fn peer_link_state(&self, a: SessionId, b: SessionId) -> Option<PeerLinkState> {
        self.rendezvous.state_of(a, b)
    }

    /// Iterates over all peer pairings; used by invariant checks in tests.
    pub fn peer_links(&self) -> impl Iterator<Item = &PeerLink> {
        self.rendezvous.iter()
    }

    /// Members of a room in join order, if the room exists.
    pub fn room_members(
        &self,
        room_id: facilitator_protocol::message::RoomId,
    ) -> Option<Vec<SessionId>> {
        self.rooms.room(room_id).map(|room| room.members().to_vec())
    }
}
