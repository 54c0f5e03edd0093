//! End-to-end tests: a real facilitator and real clients over localhost UDP.
//!
//! Interceptors stand in for hostile networks: severing the peer-to-peer
//! path simulates an untraversable NAT, and dropping every Nth datagram
//! simulates a lossy carrier underneath the reliable transport.

use std::{
    net::SocketAddr,
    thread::sleep,
    time::{Duration, Instant},
};

use facilitator::{
    ClientConfig, ClientEvent, DeliveryMode, DenyReason, FacilitatorClient, LinkFailReason,
    RoomFilter, RoomTarget, SessionId, Visibility,
};
use facilitator_core::{config::FacilitatorConfig, interceptor::Interceptor};
use facilitator_server::{Facilitator, PeerLinkState};

fn test_config() -> FacilitatorConfig {
    let mut config = FacilitatorConfig::default();
    config.transport.heartbeat_interval = Some(Duration::from_millis(200));
    config.transport.idle_timeout = Duration::from_millis(1000);
    config.transport.retransmit_base = Duration::from_millis(50);
    config.punch_window = Duration::from_millis(400);
    config.punch_interval = Duration::from_millis(50);
    config.sweep_interval = Duration::from_millis(100);
    config.session_timeout = Duration::from_secs(2);
    config.room_empty_ttl = Duration::from_millis(600);
    config
}

fn client_config(server: &FacilitatorConfig) -> ClientConfig {
    ClientConfig {
        transport: server.transport.clone(),
        punch_window: server.punch_window,
        punch_interval: server.punch_interval,
    }
}

/// Drops every datagram that is not to or from the facilitator, simulating
/// peers whose NATs cannot be traversed.
struct SeverPeerPaths {
    server: SocketAddr,
}

impl Interceptor for SeverPeerPaths {
    fn on_receive(&mut self, addr: &SocketAddr, _data: &mut [u8]) -> bool {
        *addr == self.server
    }
    fn on_send(&mut self, addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        *addr == self.server
    }
}

/// Severs peer paths and additionally drops every Nth datagram toward the
/// facilitator, exercising retransmission underneath the relay.
struct SeveredAndLossy {
    server: SocketAddr,
    counter: u32,
    every: u32,
}

impl Interceptor for SeveredAndLossy {
    fn on_receive(&mut self, addr: &SocketAddr, _data: &mut [u8]) -> bool {
        *addr == self.server
    }
    fn on_send(&mut self, addr: &SocketAddr, _data: &mut Vec<u8>) -> bool {
        if *addr != self.server {
            return false;
        }
        self.counter += 1;
        self.counter % self.every != 0
    }
}

struct Harness {
    server: Facilitator,
    clients: Vec<FacilitatorClient>,
    events: Vec<Vec<ClientEvent>>,
}

impl Harness {
    fn new(config: FacilitatorConfig, tokens: &[&str], severed: bool) -> Harness {
        let server = Facilitator::bind_any(config.clone()).unwrap();
        let server_addr = server.local_addr().unwrap();
        let clients: Vec<FacilitatorClient> = tokens
            .iter()
            .map(|token| {
                let interceptor: Option<Box<dyn Interceptor>> = if severed {
                    Some(Box::new(SeverPeerPaths { server: server_addr }))
                } else {
                    None
                };
                FacilitatorClient::connect_with(
                    server_addr,
                    token,
                    client_config(&config),
                    interceptor,
                )
                .unwrap()
            })
            .collect();
        let events = vec![Vec::new(); clients.len()];
        Harness { server, clients, events }
    }

    /// Polls everything until the predicate holds or the deadline passes.
    fn pump_until(
        &mut self,
        deadline: Duration,
        pred: impl Fn(&Harness) -> bool,
    ) -> bool {
        let start = Instant::now();
        loop {
            let now = Instant::now();
            self.server.manual_poll(now);
            let Harness { clients, events, .. } = self;
            for (index, client) in clients.iter_mut().enumerate() {
                events[index].extend(client.poll(now));
            }
            if pred(self) {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5));
        }
    }

    /// Polls only the server and a subset of clients; the rest go silent.
    fn pump_subset_until(
        &mut self,
        alive: &[usize],
        deadline: Duration,
        pred: impl Fn(&Harness) -> bool,
    ) -> bool {
        let start = Instant::now();
        loop {
            let now = Instant::now();
            self.server.manual_poll(now);
            let Harness { clients, events, .. } = self;
            for index in alive {
                events[*index].extend(clients[*index].poll(now));
            }
            if pred(self) {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5));
        }
    }

    fn await_registration(&mut self) {
        let ok = self.pump_until(Duration::from_secs(5), |h| {
            h.clients.iter().all(|c| c.session_id().is_some())
        });
        assert!(ok, "all clients should register");
    }

    fn session(&self, index: usize) -> SessionId {
        self.clients[index].session_id().expect("client is registered")
    }

    fn has_event(&self, index: usize, pred: impl Fn(&ClientEvent) -> bool) -> bool {
        self.events[index].iter().any(pred)
    }

    fn data_payloads(&self, index: usize) -> Vec<Vec<u8>> {
        self.events[index]
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Data { payload, .. } => Some(payload.as_slice().to_vec()),
                _ => None,
            })
            .collect()
    }
}

fn create_and_join(harness: &mut Harness, creator: usize, capacity: u16) -> facilitator::RoomId {
    harness.clients[creator].create_room("arena", capacity, Visibility::Public, None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(creator, |e| matches!(e, ClientEvent::RoomCreated(_)))
    });
    assert!(ok, "room should be created");
    let room_id = harness.events[creator]
        .iter()
        .find_map(|e| match e {
            ClientEvent::RoomCreated(id) => Some(*id),
            _ => None,
        })
        .unwrap();
    harness.clients[creator].join_room(RoomTarget::Id(room_id), None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(creator, |e| matches!(e, ClientEvent::RoomJoined { .. }))
    });
    assert!(ok, "creator should join its room");
    room_id
}

// ---------------------------------------------------------------------------
// Scenario A: duplicate token
// ---------------------------------------------------------------------------

#[test]
fn duplicate_token_registration_is_denied() {
    let config = test_config();
    let server = Facilitator::bind_any(config.clone()).unwrap();
    let server_addr = server.local_addr().unwrap();

    let mut harness = Harness { server, clients: Vec::new(), events: Vec::new() };
    harness.clients.push(
        FacilitatorClient::connect_with(server_addr, "T1", client_config(&config), None).unwrap(),
    );
    harness.events.push(Vec::new());
    harness.await_registration();

    // Same token again while the first session is alive.
    harness.clients.push(
        FacilitatorClient::connect_with(server_addr, "T1", client_config(&config), None).unwrap(),
    );
    harness.events.push(Vec::new());

    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(1, |e| {
            matches!(e, ClientEvent::RegistrationDenied(DenyReason::DuplicateToken))
        })
    });
    assert!(ok, "second registration with the same token should be denied");
    assert_eq!(harness.server.session_count(), 1);
}

// ---------------------------------------------------------------------------
// Scenario B: room capacity
// ---------------------------------------------------------------------------

#[test]
fn third_join_into_full_room_is_denied() {
    let mut harness = Harness::new(test_config(), &["a", "b", "c"], false);
    harness.await_registration();

    let room_id = create_and_join(&mut harness, 0, 2);

    harness.clients[1].join_room(RoomTarget::Id(room_id), None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(1, |e| matches!(e, ClientEvent::RoomJoined { .. }))
    });
    assert!(ok, "second client fills the room");

    harness.clients[2].join_room(RoomTarget::Id(room_id), None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(2, |e| matches!(e, ClientEvent::RequestDenied(DenyReason::RoomFull)))
    });
    assert!(ok, "third join should bounce off the capacity");

    // The member list never exceeded capacity.
    let members = harness.server.room_members(room_id).unwrap();
    assert_eq!(members.len(), 2);

    // The full room only shows up in listings that ask for full rooms.
    harness.clients[2].list_rooms(RoomFilter::default());
    harness.clients[2].list_rooms(RoomFilter { include_full: true, name_prefix: None });
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(2, |e| matches!(e, ClientEvent::RoomList(rooms) if rooms.is_empty()))
            && h.has_event(2, |e| matches!(e, ClientEvent::RoomList(rooms) if rooms.len() == 1))
    });
    assert!(ok, "listings should respect the include-full filter");
}

// ---------------------------------------------------------------------------
// Open network: pairs go direct
// ---------------------------------------------------------------------------

#[test]
fn peers_on_an_open_network_go_direct() {
    let mut harness = Harness::new(test_config(), &["a", "b"], false);
    harness.await_registration();

    let room_id = create_and_join(&mut harness, 0, 4);
    harness.clients[1].join_room(RoomTarget::Id(room_id), None);

    let (a, b) = (harness.session(0), harness.session(1));
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::PeerDirect(_)))
            && h.has_event(1, |e| matches!(e, ClientEvent::PeerDirect(_)))
            && h.server.peer_link_state(a, b) == Some(PeerLinkState::Direct)
    });
    assert!(ok, "loopback punching should succeed on both sides");
    assert_eq!(harness.server.relay_channel_count(), 0);

    // Payloads flow without the facilitator in the path.
    harness.clients[0]
        .send_to_peer(b, b"direct hello".to_vec(), DeliveryMode::ReliableOrdered)
        .unwrap();
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.data_payloads(1).iter().any(|p| p == b"direct hello")
    });
    assert!(ok, "peer payload should arrive over the direct path");
}

// ---------------------------------------------------------------------------
// Scenario C: severed peers fall back to relay
// ---------------------------------------------------------------------------

#[test]
fn severed_peers_fall_back_to_relay() {
    let mut harness = Harness::new(test_config(), &["a", "b"], true);
    harness.await_registration();

    let room_id = create_and_join(&mut harness, 0, 4);
    harness.clients[1].join_room(RoomTarget::Id(room_id), None);

    let ok = harness.pump_until(Duration::from_secs(6), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::PeerRelayed(_)))
            && h.has_event(1, |e| matches!(e, ClientEvent::PeerRelayed(_)))
    });
    assert!(ok, "severed pair should be promoted to the relay");

    let (a, b) = (harness.session(0), harness.session(1));
    assert_eq!(harness.server.peer_link_state(a, b), Some(PeerLinkState::Relayed));
    assert_eq!(harness.server.relay_channel_count(), 1);

    // Bit-for-bit delivery through the relay, both reliable and not.
    let blob: Vec<u8> = (0..=255u8).collect();
    harness.clients[0]
        .send_to_peer(b, blob.clone(), DeliveryMode::ReliableOrdered)
        .unwrap();
    harness.clients[1]
        .send_to_peer(a, b"back at you".to_vec(), DeliveryMode::Unreliable)
        .unwrap();

    let expected = blob.clone();
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.data_payloads(1).iter().any(|p| *p == expected)
            && h.data_payloads(0).iter().any(|p| p == b"back at you")
    });
    assert!(ok, "relayed payloads should arrive bit-for-bit in both directions");
}

// ---------------------------------------------------------------------------
// Reliable-ordered relay under a lossy carrier
// ---------------------------------------------------------------------------

#[test]
fn relay_delivers_exactly_once_in_order_under_loss() {
    let config = test_config();
    let server = Facilitator::bind_any(config.clone()).unwrap();
    let server_addr = server.local_addr().unwrap();

    let mut clients = Vec::new();
    for (token, every) in [("a", 4u32), ("b", 5u32)] {
        clients.push(
            FacilitatorClient::connect_with(
                server_addr,
                token,
                client_config(&config),
                Some(Box::new(SeveredAndLossy { server: server_addr, counter: 0, every })),
            )
            .unwrap(),
        );
    }
    let events = vec![Vec::new(); clients.len()];
    let mut harness = Harness { server, clients, events };
    harness.await_registration();

    let room_id = create_and_join(&mut harness, 0, 4);
    harness.clients[1].join_room(RoomTarget::Id(room_id), None);

    let ok = harness.pump_until(Duration::from_secs(8), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::PeerRelayed(_)))
            && h.has_event(1, |e| matches!(e, ClientEvent::PeerRelayed(_)))
    });
    assert!(ok, "pair should be relayed despite datagram loss");

    let b = harness.session(1);
    let sent: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i, i.wrapping_mul(7)]).collect();
    for payload in &sent {
        harness.clients[0]
            .send_to_peer(b, payload.clone(), DeliveryMode::ReliableOrdered)
            .unwrap();
    }

    let want = sent.clone();
    let ok = harness.pump_until(Duration::from_secs(8), |h| h.data_payloads(1).len() >= want.len());
    assert!(ok, "all reliable payloads should survive the lossy carrier");
    assert_eq!(harness.data_payloads(1), want, "exactly once, in send order");
}

// ---------------------------------------------------------------------------
// Scenario D: silent session tears down its relay
// ---------------------------------------------------------------------------

#[test]
fn silent_session_tears_down_relay_and_notifies_peer() {
    let mut harness = Harness::new(test_config(), &["a", "b"], true);
    harness.await_registration();

    let room_id = create_and_join(&mut harness, 0, 4);
    harness.clients[1].join_room(RoomTarget::Id(room_id), None);

    let ok = harness.pump_until(Duration::from_secs(6), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::PeerRelayed(_)))
            && h.has_event(1, |e| matches!(e, ClientEvent::PeerRelayed(_)))
    });
    assert!(ok, "pair should be relayed first");
    let b = harness.session(1);

    // Client B goes completely silent; A keeps heartbeating.
    let ok = harness.pump_subset_until(&[0], Duration::from_secs(6), |h| {
        h.has_event(0, |e| {
            matches!(
                e,
                ClientEvent::LinkFailed { peer, reason: LinkFailReason::PeerExpired } if *peer == b
            )
        })
    });
    assert!(ok, "surviving peer should learn the link failed");
    assert_eq!(harness.server.relay_channel_count(), 0, "relay state must be freed");
    assert_eq!(harness.server.session_count(), 1, "silent session must be expired");
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[test]
fn a_session_is_in_at_most_one_room() {
    // A long grace TTL keeps the not-yet-joined second room alive through
    // the denial round-trips below.
    let mut config = test_config();
    config.room_empty_ttl = Duration::from_secs(60);
    let mut harness = Harness::new(config, &["a"], false);
    harness.await_registration();

    let first = create_and_join(&mut harness, 0, 4);

    harness.clients[0].create_room("second", 4, Visibility::Public, None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.events[0].iter().filter(|e| matches!(e, ClientEvent::RoomCreated(_))).count() >= 2
    });
    assert!(ok);
    let second = harness.events[0]
        .iter()
        .filter_map(|e| match e {
            ClientEvent::RoomCreated(id) if *id != first => Some(*id),
            _ => None,
        })
        .next()
        .unwrap();

    // Joining elsewhere while a member is refused.
    harness.clients[0].join_room(RoomTarget::Id(second), None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::RequestDenied(DenyReason::AlreadyMember)))
    });
    assert!(ok, "second membership must be refused");

    // Leave, then the same join succeeds.
    harness.clients[0].leave_room();
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::RoomLeft))
    });
    assert!(ok);
    harness.clients[0].join_room(RoomTarget::Id(second), None);
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::RoomJoined { room_id, .. } if *room_id == second))
    });
    assert!(ok, "join succeeds after leaving the first room");
}

#[test]
fn peer_links_leave_negotiating_once_the_window_elapses() {
    let mut harness = Harness::new(test_config(), &["a", "b", "c"], true);
    harness.await_registration();

    let room_id = create_and_join(&mut harness, 0, 4);
    harness.clients[1].join_room(RoomTarget::Id(room_id), None);
    harness.clients[2].join_room(RoomTarget::Id(room_id), None);

    // Wait out the window plus margin, then require every pairing terminal.
    let window = test_config().punch_window;
    let ok = harness.pump_until(window * 10, |h| {
        h.server.peer_link_count() == 3
            && h.server.peer_links().all(|link| link.state != PeerLinkState::Negotiating)
    });
    assert!(ok, "no pairing may stay negotiating after its window");
}

#[test]
fn an_emptied_room_is_destroyed_after_the_grace_ttl() {
    let mut harness = Harness::new(test_config(), &["a"], false);
    harness.await_registration();

    create_and_join(&mut harness, 0, 4);
    assert_eq!(harness.server.room_count(), 1);

    harness.clients[0].leave_room();
    let ok = harness.pump_until(Duration::from_secs(5), |h| {
        h.has_event(0, |e| matches!(e, ClientEvent::RoomLeft))
    });
    assert!(ok);
    // Still inside the grace window.
    assert_eq!(harness.server.room_count(), 1);

    let ok = harness.pump_until(Duration::from_secs(5), |h| h.server.room_count() == 0);
    assert!(ok, "empty room should be swept after its TTL");
}
