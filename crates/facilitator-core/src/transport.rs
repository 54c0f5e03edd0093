//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// Lets the link pump run over real UDP, a loopback pair in tests, or any
/// other datagram-shaped carrier without coupling to a concrete socket.
pub trait Socket {
    /// Sends one datagram to the given address.
    fn send_to(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives one datagram, returning the filled slice and the sender.
    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// The local address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Whether the socket blocks on receive.
    fn is_blocking(&self) -> bool;
}
