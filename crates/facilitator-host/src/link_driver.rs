use std::{net::SocketAddr, time::Instant};

use facilitator_core::config::TransportConfig;
use facilitator_link::{Link, LinkState};
use facilitator_protocol::packet::Packet;
use tracing::warn;

use crate::{
    driver::{HasAddress, LinkDriver},
    event::{Action, TransportEvent},
};

impl HasAddress for TransportEvent {
    fn address(&self) -> SocketAddr {
        match self {
            TransportEvent::Packet(packet) => packet.addr(),
            TransportEvent::Connected(addr) => *addr,
            TransportEvent::Timeout(addr) => *addr,
            TransportEvent::Disconnected(addr) => *addr,
        }
    }
}

impl HasAddress for Packet {
    fn address(&self) -> SocketAddr {
        self.addr()
    }
}

impl LinkDriver for Link {
    type SendEvent = Packet;
    type ReceiveEvent = TransportEvent;

    fn create_link(config: &TransportConfig, address: SocketAddr, time: Instant) -> Link {
        Link::new(address, config, time)
    }

    fn is_established(&self) -> bool {
        Link::is_established(self)
    }

    fn should_drop(&mut self, time: Instant) -> (bool, Vec<Action<Self::ReceiveEvent>>) {
        let mut actions = Vec::new();
        let addr = self.remote_address;

        // Remote disconnect or our own flushed disconnect: quiet close.
        if self.state().is_closed()
            || (self.state() == LinkState::Disconnecting && !self.has_pending())
        {
            if self.was_established() {
                actions.push(Action::Emit(TransportEvent::Disconnected(addr)));
            }
            return (true, actions);
        }

        // Failure paths: exhausted retransmissions, idle silence, runaway backlog.
        if self.should_close(time) {
            actions.push(Action::Emit(TransportEvent::Timeout(addr)));
            if self.was_established() {
                actions.push(Action::Emit(TransportEvent::Disconnected(addr)));
            }
            return (true, actions);
        }

        (false, actions)
    }

    fn process_datagram(
        &mut self,
        payload: &[u8],
        time: Instant,
    ) -> Vec<Action<Self::ReceiveEvent>> {
        let mut actions = Vec::new();
        if payload.is_empty() {
            warn!("discarding empty datagram from {}", self.remote_address);
            return actions;
        }
        match Link::process_datagram(self, payload, time) {
            Ok(delivered) => {
                if self.record_recv() {
                    actions.push(Action::Emit(TransportEvent::Connected(self.remote_address)));
                }
                for item in delivered {
                    actions.push(Action::Emit(TransportEvent::Packet(Packet::new(
                        self.remote_address,
                        item.data,
                        item.mode,
                        item.channel_id,
                    ))));
                }
            }
            Err(err) => warn!("dropping datagram from {}: {}", self.remote_address, err),
        }
        actions
    }

    fn process_event(&mut self, event: Packet, time: Instant) -> Vec<Action<Self::ReceiveEvent>> {
        let mut actions = Vec::new();
        let addr = self.remote_address;
        if self.record_send() {
            actions.push(Action::Emit(TransportEvent::Connected(addr)));
        }
        if let Err(err) =
            self.enqueue_payload(event.channel_id(), event.payload_shared(), event.mode(), time)
        {
            warn!("refusing send to {}: {}", addr, err);
            return actions;
        }
        // Flush straight away so user payloads do not wait for the next tick.
        for datagram in self.encode_pending(time) {
            actions.push(Action::Send(datagram));
        }
        actions
    }

    fn update(&mut self, time: Instant) -> Vec<Action<Self::ReceiveEvent>> {
        Link::update(self, time);
        let mut actions = Vec::new();
        if self.has_pending() {
            let was_established = self.is_established();
            for datagram in self.encode_pending(time) {
                actions.push(Action::Send(datagram));
            }
            if !was_established && self.is_established() {
                actions.push(Action::Emit(TransportEvent::Connected(self.remote_address)));
            }
        }
        actions
    }
}
