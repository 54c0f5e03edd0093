#![warn(missing_docs)]

//! facilitator-protocol: the wire protocol.
//!
//! Two layers share this crate:
//!
//! - The **transport frame** layer: per-datagram command batches with
//!   acknowledgment, retransmission bookkeeping, and ordered release
//!   (`frame`, `codec`, `acknowledgment`, `sequence_buffer`, `reorder`).
//! - The **facilitator message** layer: registration, rooms, rendezvous,
//!   and relay messages that ride inside transport payloads (`message`).

/// Reliable-delivery acknowledgment and retransmission bookkeeping.
pub mod acknowledgment;
/// Binary encoding and decoding for frames and messages.
pub mod codec;
/// Transport frame commands and per-datagram batching.
pub mod frame;
/// Facilitator control, rendezvous, and relay messages.
pub mod message;
/// Delivery modes and the user-facing packet type.
pub mod packet;
/// Bounded reorder window for ordered channels.
pub mod reorder;
/// Wrapping sequence-number buffer.
pub mod sequence_buffer;

pub use acknowledgment::{AcknowledgmentHandler, Retransmit};
pub use frame::{Frame, FrameCommand};
pub use packet::{DeliveryMode, Packet, SequenceNumber};
