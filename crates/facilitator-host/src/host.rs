use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread::{sleep, yield_now},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use facilitator_core::{
    config::TransportConfig,
    error::Result,
    interceptor::Interceptor,
    transport::Socket,
};
use facilitator_link::Link;
use facilitator_protocol::packet::Packet;
use socket2::Socket as Socket2;

use crate::{
    clock::{Clock, SystemClock},
    event::TransportEvent,
    manager::LinkManager,
};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &TransportConfig) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);
    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    Ok(())
}

/// Standard-library UDP socket behind the transport trait.
#[derive(Debug)]
struct UdpTransport {
    blocking: bool,
    socket: UdpSocket,
}

impl UdpTransport {
    fn new(socket: UdpSocket, blocking: bool) -> Result<Self> {
        socket.set_nonblocking(!blocking)?;
        Ok(UdpTransport { blocking, socket })
    }
}

impl Socket for UdpTransport {
    fn send_to(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(len, address)| (&buffer[..len], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }
}

/// A bound UDP endpoint pumping reliable links.
///
/// Both the facilitator server and its clients are a `Host`: packets go in
/// through [`Host::send`], transport events come out of [`Host::recv`], and
/// [`Host::manual_poll`] (or [`Host::start_polling`]) drives all timers.
pub struct Host {
    manager: LinkManager<UdpTransport, Link>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").field("manager", &self.manager).finish()
    }
}

impl Host {
    /// Binds to the given address with default configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, TransportConfig::default())
    }

    /// Binds to an ephemeral localhost port with default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(TransportConfig::default())
    }

    /// Binds to an ephemeral localhost port with the given configuration.
    pub fn bind_any_with_config(config: TransportConfig) -> Result<Self> {
        let loopback = Ipv4Addr::new(127, 0, 0, 1);
        let socket = UdpSocket::bind(SocketAddrV4::new(loopback, 0))?;
        Self::from_socket(socket, config, Arc::new(SystemClock), None)
    }

    /// Binds to the given address with the given configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: TransportConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::from_socket(socket, config, Arc::new(SystemClock), None)
    }

    /// Binds with a custom interceptor for datagram inspection or fault injection.
    pub fn bind_with_interceptor<A: ToSocketAddrs>(
        addresses: A,
        config: TransportConfig,
        interceptor: Box<dyn Interceptor>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::from_socket(socket, config, Arc::new(SystemClock), Some(interceptor))
    }

    /// Builds a host from an already-bound socket, clock, and optional interceptor.
    pub fn from_socket(
        socket: UdpSocket,
        config: TransportConfig,
        clock: Arc<dyn Clock>,
        interceptor: Option<Box<dyn Interceptor>>,
    ) -> Result<Self> {
        apply_socket_options(&socket, &config)?;
        let blocking = config.blocking_mode;
        Ok(Host {
            manager: LinkManager::with_interceptor(
                UdpTransport::new(socket, blocking)?,
                config,
                interceptor,
            ),
            clock,
        })
    }

    /// Clone of the packet sender channel.
    pub fn packet_sender(&self) -> Sender<Packet> {
        self.manager.event_sender().clone()
    }

    /// Clone of the transport event receiver channel.
    pub fn event_receiver(&self) -> Receiver<TransportEvent> {
        self.manager.event_receiver().clone()
    }

    /// Queues a packet; it is flushed during the next poll.
    pub fn send(&mut self, packet: Packet) {
        self.manager.event_sender().send(packet).expect("pump owns the receiver");
    }

    /// Takes the next transport event, if any.
    pub fn recv(&mut self) -> Option<TransportEvent> {
        match self.manager.event_receiver().try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => unreachable!("pump owns the sender"),
        }
    }

    /// Polls the socket and all link timers at the given instant.
    pub fn manual_poll(&mut self, time: Instant) {
        self.manager.manual_poll(time);
    }

    /// Polls in a loop with a 1ms pause (blocking call).
    pub fn start_polling(&mut self) {
        self.start_polling_with_duration(Some(Duration::from_millis(1)))
    }

    /// Polls in a loop with a custom pause between iterations (blocking call).
    pub fn start_polling_with_duration(&mut self, sleep_duration: Option<Duration>) {
        loop {
            self.manual_poll(self.clock.now());
            match sleep_duration {
                None => yield_now(),
                Some(duration) => sleep(duration),
            }
        }
    }

    /// Local address the host is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.manager.socket().local_addr()?)
    }

    /// Begins a graceful disconnect from the given endpoint.
    pub fn disconnect(&mut self, addr: SocketAddr) {
        if let Some(link) = self.manager.link_mut(&addr) {
            link.disconnect();
        }
    }

    /// When a datagram last arrived from this endpoint, if it has a link.
    /// This is the transport-level liveness signal the session registry
    /// consumes.
    pub fn last_heard(&mut self, addr: SocketAddr) -> Option<Instant> {
        self.manager.link_mut(&addr).map(|link| link.last_heard)
    }

    /// Number of links in any state.
    pub fn links_count(&self) -> usize {
        self.manager.links_count()
    }

    /// Number of established links.
    pub fn established_links_count(&self) -> usize {
        self.manager.established_links_count()
    }
}
