//! Actions links return to the pump and events the pump emits upward.

use std::net::SocketAddr;

use facilitator_protocol::packet::Packet;

/// Instructions a link driver hands back to the pump.
#[derive(Debug)]
pub enum Action<E> {
    /// Send the given datagram to the link's remote address.
    Send(Vec<u8>),
    /// Emit an event to the embedding application.
    Emit(E),
}

/// Events emitted through the host's event receiver.
#[derive(Debug, PartialEq)]
pub enum TransportEvent {
    /// A payload arrived from a remote endpoint.
    Packet(Packet),
    /// Traffic has flowed both ways with this endpoint.
    Connected(SocketAddr),
    /// The endpoint idled past the timeout or exhausted retransmissions.
    Timeout(SocketAddr),
    /// An established endpoint is gone.
    Disconnected(SocketAddr),
}
