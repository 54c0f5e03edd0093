use std::{fmt::Debug, net::SocketAddr, time::Instant};

use facilitator_core::config::TransportConfig;

use crate::event::Action;

/// Anything that can be routed to a remote address.
pub trait HasAddress {
    /// The remote address this item concerns.
    fn address(&self) -> SocketAddr;
}

/// Per-endpoint engine the pump drives.
///
/// The pump owns one driver per remote address and calls into it for
/// inbound datagrams, outbound user events, and timer ticks; the driver
/// answers with actions (datagrams to send, events to emit).
pub trait LinkDriver: Debug {
    /// Outbound items the application pushes into the pump.
    type SendEvent: Debug + HasAddress;
    /// Events the pump emits to the application.
    type ReceiveEvent: Debug + HasAddress;

    /// Creates a driver for a newly seen remote address.
    fn create_link(config: &TransportConfig, address: SocketAddr, time: Instant) -> Self;

    /// True once traffic has flowed in both directions.
    fn is_established(&self) -> bool;

    /// Whether the pump should drop this link, plus any farewell actions.
    fn should_drop(&mut self, time: Instant) -> (bool, Vec<Action<Self::ReceiveEvent>>);

    /// Handles one received datagram.
    fn process_datagram(&mut self, payload: &[u8], time: Instant)
        -> Vec<Action<Self::ReceiveEvent>>;

    /// Handles one outbound user event.
    fn process_event(
        &mut self,
        event: Self::SendEvent,
        time: Instant,
    ) -> Vec<Action<Self::ReceiveEvent>>;

    /// Runs timers: retransmissions, keepalives, and queued flushes.
    fn update(&mut self, time: Instant) -> Vec<Action<Self::ReceiveEvent>>;
}
