#![warn(missing_docs)]

//! facilitator-server: the rendezvous and relay service.
//!
//! The [`Facilitator`] binds a host, authenticates sessions into the
//! registry, groups them into rooms, negotiates NAT traversal for every
//! room pairing, and relays traffic for pairs that cannot reach each other
//! directly. All state lives in tables owned by the server's poll task;
//! nothing is shared mutably across threads.

/// Session registry and token validation.
pub mod registry;
/// Relay engine: per-channel forwarding with quotas.
pub mod relay;
/// Rendezvous coordinator: peer link state machines.
pub mod rendezvous;
/// Room directory.
pub mod rooms;
/// The server shell.
pub mod server;

pub use registry::{AcceptNonEmpty, SessionRegistry, TokenValidator};
pub use relay::RelayEngine;
pub use rendezvous::{LinkId, PeerLinkState, RendezvousCoordinator};
pub use rooms::{RoomConfig, RoomDirectory};
pub use server::Facilitator;
