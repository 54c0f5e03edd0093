//! Delivery modes and the user-facing packet type.

use std::net::SocketAddr;

use facilitator_core::{
    error::DecodeError,
    shared::SharedBytes,
};

/// 16-bit wrapping sequence number used by the transport.
pub type SequenceNumber = u16;

/// How a payload should be delivered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Fire-and-forget; may be lost, duplicated, or reordered.
    #[default]
    Unreliable,
    /// Retransmitted until acknowledged; arrival order is not guaranteed.
    ReliableUnordered,
    /// Retransmitted until acknowledged and released strictly in send order.
    ReliableOrdered,
}

impl DeliveryMode {
    /// Wire representation of the mode.
    pub fn to_u8(self) -> u8 {
        match self {
            DeliveryMode::Unreliable => 0,
            DeliveryMode::ReliableUnordered => 1,
            DeliveryMode::ReliableOrdered => 2,
        }
    }

    /// True for the modes that retransmit until acknowledged.
    pub fn is_reliable(self) -> bool {
        !matches!(self, DeliveryMode::Unreliable)
    }

    /// True when delivery must preserve send order.
    pub fn is_ordered(self) -> bool {
        matches!(self, DeliveryMode::ReliableOrdered)
    }
}

impl TryFrom<u8> for DeliveryMode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryMode::Unreliable),
            1 => Ok(DeliveryMode::ReliableUnordered),
            2 => Ok(DeliveryMode::ReliableOrdered),
            _ => Err(DecodeError::DeliveryMode),
        }
    }
}

/// A payload bound to (or received from) a remote endpoint.
///
/// This is the unit the host layer sends and emits: address, payload bytes,
/// delivery mode, and the transport channel the ordering guarantee applies to.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Packet {
    addr: SocketAddr,
    payload: SharedBytes,
    mode: DeliveryMode,
    channel_id: u8,
}

impl Packet {
    /// Creates a packet with an explicit mode and channel.
    pub fn new(
        addr: SocketAddr,
        payload: SharedBytes,
        mode: DeliveryMode,
        channel_id: u8,
    ) -> Packet {
        Packet { addr, payload, mode, channel_id }
    }

    /// Fire-and-forget packet on the given channel.
    pub fn unreliable(addr: SocketAddr, payload: impl Into<SharedBytes>, channel_id: u8) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMode::Unreliable, channel_id)
    }

    /// Guaranteed-delivery packet without ordering.
    pub fn reliable_unordered(
        addr: SocketAddr,
        payload: impl Into<SharedBytes>,
        channel_id: u8,
    ) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMode::ReliableUnordered, channel_id)
    }

    /// Guaranteed-delivery packet released in send order on its channel.
    pub fn reliable_ordered(
        addr: SocketAddr,
        payload: impl Into<SharedBytes>,
        channel_id: u8,
    ) -> Packet {
        Packet::new(addr, payload.into(), DeliveryMode::ReliableOrdered, channel_id)
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Clones the shared payload handle without copying bytes.
    pub fn payload_shared(&self) -> SharedBytes {
        self.payload.clone()
    }

    /// Remote endpoint address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Transport channel.
    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }
}
