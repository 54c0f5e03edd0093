#![warn(missing_docs)]

//! Facilitator: a small public API facade for the workspace.
//!
//! This crate provides the surface consuming subsystems build against:
//!
//! - The client session API ([`FacilitatorClient`], [`ClientEvent`]):
//!   connect, create/join/leave rooms, send to peers by reliability mode,
//!   and a stream of received-from-peer events. None of the facilitator's
//!   internal state machines leak through it.
//! - Commonly used protocol and transport types re-exported from the
//!   lower layers.

/// Client-side session API.
pub mod client;

pub use client::{ClientConfig, ClientEvent, FacilitatorClient, PeerPath};
// Core config and errors
pub use facilitator_core::{
    config::{FacilitatorConfig, TransportConfig},
    error::{ErrorKind, Result},
    shared::SharedBytes,
};
// Host: the socket shell both sides run on
pub use facilitator_host::{Host, TransportEvent};
// Protocol: message and packet vocabulary
pub use facilitator_protocol::{
    message::{
        DenyReason, LinkFailReason, RoomFilter, RoomId, RoomSummary, RoomTarget, SessionId,
        Visibility,
    },
    packet::{DeliveryMode, Packet},
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientEvent, DeliveryMode, DenyReason, FacilitatorClient, RoomTarget,
        SessionId, Visibility,
    };
}
