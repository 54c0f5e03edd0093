#![warn(missing_docs)]

//! facilitator-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core utilities shared across all layers:
//! - Configuration types (transport tuning and service limits)
//! - Error handling
//! - Protocol constants
//! - Shared, reference-counted byte buffers
//!
//! Protocol and service logic live in the specialized crates:
//! - `facilitator-protocol`: frame commands, codec, acknowledgment, reordering
//! - `facilitator-link`: per-remote reliability engine
//! - `facilitator-host`: socket shell and link pump
//! - `facilitator-server`: session registry, rooms, rendezvous, relay

/// Protocol constants shared across layers.
pub mod constants {
    /// Current wire protocol version, carried in every frame header.
    pub const PROTOCOL_VERSION: u8 = 1;
    /// Size of the frame header: version (1) + command count (1).
    pub const FRAME_HEADER_SIZE: usize = 2;
    /// Number of earlier sequence numbers covered by the redundant ack bitfield.
    pub const ACK_REDUNDANCY: u16 = 32;
    /// Transport channel carrying facilitator control messages.
    pub const CONTROL_CHANNEL: u8 = 0;
    /// Maximum transmission unit of a frame.
    ///
    /// Derived from ethernet_mtu - ipv6_header_size - udp_header_size
    ///       1452 = 1500         - 40               - 8
    pub const DEFAULT_MTU: u16 = 1452;
}

/// Configuration options for the transport and the facilitator service.
pub mod config;
/// Error types and results.
pub mod error;
/// Packet interception for fault injection and inspection.
pub mod interceptor;
/// Shared, reference-counted byte slices.
pub mod shared;
/// Transport abstraction for pluggable I/O.
pub mod transport;
