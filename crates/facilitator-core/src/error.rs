use std::io;

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that facilitator operations can produce.
///
/// The service-level variants map one-to-one onto wire denials; transport
/// variants never cross the transport boundary upward.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The token was rejected or is already bound to a live session.
    #[error("invalid or already-bound session token")]
    AuthenticationError,
    /// Joining would exceed the room's configured capacity.
    #[error("room is at capacity")]
    RoomFullError,
    /// The requested room id does not exist (or no room matched the criteria).
    #[error("room not found")]
    RoomNotFoundError,
    /// The session is already a member of a room and must leave first.
    #[error("session is already a member of a room")]
    AlreadyMemberError,
    /// The room requires a password and the supplied one did not match.
    #[error("room password rejected")]
    BadPasswordError,
    /// A server-wide resource cap was reached; back off and retry later.
    #[error("server capacity exhausted: {0}")]
    CapacityError(&'static str),
    /// No direct or relayed path to the requested peer exists.
    #[error("no path to peer")]
    PeerUnreachable,
    /// A payload exceeded the transport's configured maximum.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum payload size.
        limit: usize,
    },
    /// Received bytes could not be decoded.
    #[error("could not decode {0}")]
    DecodeError(#[from] DecodeError),
    /// An I/O error from the underlying socket.
    #[error("an I/O error occurred: {0}")]
    IoError(#[from] io::Error),
}

/// What exactly failed to decode.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame header was missing or carried an unknown protocol version.
    #[error("frame header")]
    FrameHeader,
    /// A frame command had an unknown type or truncated fields.
    #[error("frame command")]
    FrameCommand,
    /// A delivery mode byte was out of range.
    #[error("delivery mode")]
    DeliveryMode,
    /// A facilitator message had an unknown kind or truncated fields.
    #[error("message")]
    Message,
    /// An embedded string was not valid UTF-8.
    #[error("string field")]
    StringField,
}
