//! Transport frame commands.
//!
//! Every datagram carries a batch of commands so acknowledgments, pings, and
//! payload data share the wire efficiently.

use facilitator_core::shared::SharedBytes;

use crate::packet::SequenceNumber;

/// One transport-level command inside a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameCommand {
    /// Fire-and-forget payload on a channel.
    SendUnreliable {
        /// Channel identifier.
        channel_id: u8,
        /// Payload bytes.
        data: SharedBytes,
    },

    /// Acknowledged payload on a channel.
    SendReliable {
        /// Channel identifier.
        channel_id: u8,
        /// Sender-assigned sequence number.
        sequence: SequenceNumber,
        /// Release in sequence order at the receiver when true.
        ordered: bool,
        /// Payload bytes.
        data: SharedBytes,
    },

    /// Acknowledges `sequence` plus the 32 packets before it via the bitfield.
    Acknowledge {
        /// Most recent sequence number received.
        sequence: SequenceNumber,
        /// Bit N set means `sequence - 1 - N` was also received.
        received_mask: u32,
    },

    /// Asks the sender to retransmit `sequence` immediately; sent when an
    /// ordered channel drops an arrival beyond its reorder window.
    ResendRequest {
        /// Channel whose ordered stream is stalled.
        channel_id: u8,
        /// Sequence number the receiver is still waiting for.
        sequence: SequenceNumber,
    },

    /// Keepalive probe; also feeds round-trip estimation.
    Ping {
        /// Correlation nonce echoed by the pong.
        nonce: u32,
    },

    /// Response to a ping.
    Pong {
        /// Nonce from the matching ping.
        nonce: u32,
    },

    /// Graceful link teardown.
    Disconnect {
        /// Application-defined reason code.
        reason: u8,
    },
}

impl FrameCommand {
    /// Wire tag for the command.
    pub fn command_type(&self) -> u8 {
        match self {
            FrameCommand::SendUnreliable { .. } => 1,
            FrameCommand::SendReliable { .. } => 2,
            FrameCommand::Acknowledge { .. } => 3,
            FrameCommand::ResendRequest { .. } => 4,
            FrameCommand::Ping { .. } => 5,
            FrameCommand::Pong { .. } => 6,
            FrameCommand::Disconnect { .. } => 7,
        }
    }

}

/// A batch of commands encoded into one datagram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Commands in wire order.
    pub commands: Vec<FrameCommand>,
}

impl Frame {
    /// Creates an empty frame.
    pub fn new() -> Self {
        Self { commands: Vec::new() }
    }

    /// Creates a frame holding one command.
    pub fn single(command: FrameCommand) -> Self {
        Self { commands: vec![command] }
    }

    /// Appends a command.
    pub fn push(&mut self, command: FrameCommand) {
        self.commands.push(command);
    }

    /// Number of commands in the frame.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when the frame holds no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
