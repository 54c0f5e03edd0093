use std::{collections::HashMap, fmt::Debug, net::SocketAddr, time::Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use facilitator_core::{
    config::TransportConfig,
    interceptor::{Interceptor, NoOpInterceptor},
    transport::Socket,
};
use tracing::error;

use crate::{
    driver::{HasAddress, LinkDriver},
    event::Action,
};

/// Socket, config, and the outboxes shared by every link.
struct Messenger<TSocket: Socket, ReceiveEvent: Debug> {
    config: TransportConfig,
    socket: TSocket,
    event_sender: Sender<ReceiveEvent>,
    pending_sends: Vec<(SocketAddr, Vec<u8>)>,
    pending_events: Vec<ReceiveEvent>,
    interceptor: Box<dyn Interceptor>,
}

impl<TSocket: Socket, ReceiveEvent: Debug> Messenger<TSocket, ReceiveEvent> {
    fn new(
        config: TransportConfig,
        socket: TSocket,
        event_sender: Sender<ReceiveEvent>,
        interceptor: Box<dyn Interceptor>,
    ) -> Self {
        Self {
            config,
            socket,
            event_sender,
            pending_sends: Vec::new(),
            pending_events: Vec::new(),
            interceptor,
        }
    }

    fn handle_actions(&mut self, address: &SocketAddr, actions: Vec<Action<ReceiveEvent>>) {
        for action in actions {
            match action {
                Action::Send(bytes) => self.pending_sends.push((*address, bytes)),
                Action::Emit(event) => self.pending_events.push(event),
            }
        }
    }

    fn flush(&mut self) {
        for (addr, mut payload) in self.pending_sends.drain(..) {
            if !self.interceptor.on_send(&addr, &mut payload) {
                continue;
            }
            if let Err(err) = self.socket.send_to(&addr, &payload) {
                error!("error sending a datagram to {}: {}", addr, err);
            }
        }
        for event in self.pending_events.drain(..) {
            self.event_sender.send(event).expect("event receiver must exist");
        }
    }
}

/// Pumps a set of link drivers over one datagram socket.
///
/// Owns the per-address driver table. Each `manual_poll` pass drains the
/// socket, applies queued user events, ticks every driver, reaps dead
/// links, and flushes pending sends and events.
pub struct LinkManager<TSocket: Socket, TLink: LinkDriver> {
    links: HashMap<SocketAddr, TLink>,
    receive_buffer: Vec<u8>,
    user_event_receiver: Receiver<TLink::SendEvent>,
    user_event_sender: Sender<TLink::SendEvent>,
    messenger: Messenger<TSocket, TLink::ReceiveEvent>,
    event_receiver: Receiver<TLink::ReceiveEvent>,
    max_unestablished_links: u16,
}

impl<TSocket: Socket, TLink: LinkDriver> std::fmt::Debug for LinkManager<TSocket, TLink> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager").field("links", &self.links.len()).finish()
    }
}

impl<TSocket: Socket, TLink: LinkDriver> LinkManager<TSocket, TLink> {
    /// Creates a pump over the given socket.
    pub fn new(socket: TSocket, config: TransportConfig) -> Self {
        Self::with_interceptor(socket, config, None)
    }

    /// Creates a pump with a custom datagram interceptor.
    pub fn with_interceptor(
        socket: TSocket,
        config: TransportConfig,
        interceptor: Option<Box<dyn Interceptor>>,
    ) -> Self {
        let (event_sender, event_receiver) = unbounded();
        let (user_event_sender, user_event_receiver) = unbounded();
        let max_unestablished_links = config.max_unestablished_links;
        let interceptor = interceptor.unwrap_or_else(|| Box::new(NoOpInterceptor));

        LinkManager {
            links: HashMap::new(),
            receive_buffer: vec![0; config.receive_buffer_size],
            user_event_receiver,
            user_event_sender,
            messenger: Messenger::new(config, socket, event_sender, interceptor),
            event_receiver,
            max_unestablished_links,
        }
    }

    /// Polls for network I/O and processes every link.
    pub fn manual_poll(&mut self, time: Instant) {
        let mut unestablished = self.unestablished_link_count();

        // Drain the socket.
        loop {
            match self.messenger.socket.recv_from(self.receive_buffer.as_mut()) {
                Ok((payload, address)) => {
                    let payload_len = payload.len();
                    let should_process = {
                        let slice = &mut self.receive_buffer[..payload_len];
                        self.messenger.interceptor.on_receive(&address, slice)
                    };
                    if !should_process {
                        continue;
                    }
                    let payload = &self.receive_buffer[..payload_len];

                    if let Some(link) = self.links.get_mut(&address) {
                        let was_established = link.is_established();
                        let actions = link.process_datagram(payload, time);
                        self.messenger.handle_actions(&address, actions);
                        if !was_established && link.is_established() {
                            unestablished = unestablished.saturating_sub(1);
                        }
                    } else if unestablished < self.max_unestablished_links as usize {
                        let mut link =
                            TLink::create_link(&self.messenger.config, address, time);
                        let actions = link.process_datagram(payload, time);
                        self.messenger.handle_actions(&address, actions);
                        self.links.insert(address, link);
                        unestablished += 1;
                    }
                    // Beyond the unestablished cap the datagram is dropped:
                    // strangers cannot grow the table.
                }
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::WouldBlock {
                        error!("error receiving a datagram: {:?}", err);
                    }
                    break;
                }
            }
            if self.messenger.socket.is_blocking() {
                break;
            }
        }

        // Apply queued user events.
        while let Ok(event) = self.user_event_receiver.try_recv() {
            let addr = event.address();
            use std::collections::hash_map::Entry;
            match self.links.entry(addr) {
                Entry::Occupied(mut entry) => {
                    let link = entry.get_mut();
                    let was_established = link.is_established();
                    let actions = link.process_event(event, time);
                    self.messenger.handle_actions(&addr, actions);
                    if !was_established && link.is_established() {
                        unestablished = unestablished.saturating_sub(1);
                    }
                }
                Entry::Vacant(entry) => {
                    let mut link = TLink::create_link(&self.messenger.config, addr, time);
                    let actions = link.process_event(event, time);
                    entry.insert(link);
                    self.messenger.handle_actions(&addr, actions);
                }
            }
        }

        // Tick timers.
        for (addr, link) in self.links.iter_mut() {
            let actions = link.update(time);
            self.messenger.handle_actions(addr, actions);
        }

        // Reap dead links.
        let mut to_drop = Vec::new();
        for (addr, link) in self.links.iter_mut() {
            let (drop, actions) = link.should_drop(time);
            self.messenger.handle_actions(addr, actions);
            if drop {
                to_drop.push(*addr);
            }
        }
        for addr in to_drop {
            self.links.remove(&addr);
        }

        self.messenger.flush();
    }

    /// Sender for pushing user events into the pump.
    pub fn event_sender(&self) -> &Sender<TLink::SendEvent> {
        &self.user_event_sender
    }

    /// Receiver of transport events.
    pub fn event_receiver(&self) -> &Receiver<TLink::ReceiveEvent> {
        &self.event_receiver
    }

    /// The underlying socket.
    pub fn socket(&self) -> &TSocket {
        &self.messenger.socket
    }

    /// Number of links in the table.
    pub fn links_count(&self) -> usize {
        self.links.len()
    }

    /// Borrows one link by remote address.
    pub fn link_mut(&mut self, addr: &SocketAddr) -> Option<&mut TLink> {
        self.links.get_mut(addr)
    }

    /// Number of established links.
    pub fn established_links_count(&self) -> usize {
        self.links.values().filter(|link| link.is_established()).count()
    }

    fn unestablished_link_count(&self) -> usize {
        self.links.values().filter(|link| !link.is_established()).count()
    }
}
