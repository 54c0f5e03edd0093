//! Facilitator control, rendezvous, and relay messages.
//!
//! These ride inside transport payloads: control messages on the
//! reliable-ordered control channel between client and server, punch
//! messages as unreliable datagrams directly between peers.

use std::{fmt, net::SocketAddr};

use facilitator_core::{error::DecodeError, shared::SharedBytes};

use crate::packet::DeliveryMode;

/// Identifies one registered client session.
///
/// Rendered as zero-padded hex so lexicographic ordering of the rendered id
/// matches numeric ordering; the punch-initiator tie-break relies on this.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies one room.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies one relay channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Transport channel this relay channel's traffic rides on, keeping
    /// relayed ordered streams out of the control channel's ordering domain.
    pub fn transport_channel(self) -> u8 {
        1 + (self.0 % (u8::MAX as u64)) as u8
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Where a candidate endpoint was observed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    /// Declared by the client from its own interfaces.
    Local,
    /// Reflected from the source address the server observed.
    Public,
    /// Reached through the facilitator's relay.
    Relay,
}

impl EndpointKind {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            EndpointKind::Local => 0,
            EndpointKind::Public => 1,
            EndpointKind::Relay => 2,
        }
    }
}

impl TryFrom<u8> for EndpointKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EndpointKind::Local),
            1 => Ok(EndpointKind::Public),
            2 => Ok(EndpointKind::Relay),
            _ => Err(DecodeError::Message),
        }
    }
}

/// A candidate address for reaching a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Address and port.
    pub addr: SocketAddr,
    /// Classification of the candidate.
    pub kind: EndpointKind,
}

/// Who may discover and join a room.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Listed and joinable by anyone.
    Public,
    /// Never listed; joinable only by id.
    Private,
    /// Listed; joining requires the room password.
    PasswordProtected,
}

impl Visibility {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Visibility::Public => 0,
            Visibility::Private => 1,
            Visibility::PasswordProtected => 2,
        }
    }
}

impl TryFrom<u8> for Visibility {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Visibility::Public),
            1 => Ok(Visibility::Private),
            2 => Ok(Visibility::PasswordProtected),
            _ => Err(DecodeError::Message),
        }
    }
}

/// What a join request targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomTarget {
    /// A specific room.
    Id(RoomId),
    /// Any listable room with free capacity, optionally matching a name.
    Match {
        /// Exact room name to match, or None for any.
        name: Option<String>,
    },
}

/// Filter for room listings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoomFilter {
    /// Include rooms that are currently full.
    pub include_full: bool,
    /// Only rooms whose name starts with this prefix.
    pub name_prefix: Option<String>,
}

/// One row of a room listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room id.
    pub room_id: RoomId,
    /// Human-readable name.
    pub name: String,
    /// Discovery/join policy.
    pub visibility: Visibility,
    /// Maximum member count.
    pub capacity: u16,
    /// Current member count.
    pub members: u16,
}

/// Why a request was denied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DenyReason {
    /// The token failed validation.
    InvalidToken,
    /// The token is already bound to a live session.
    DuplicateToken,
    /// The room is at capacity.
    RoomFull,
    /// No such room (or nothing matched the criteria).
    RoomNotFound,
    /// The session must leave its current room first.
    AlreadyMember,
    /// Wrong or missing room password.
    BadPassword,
    /// A server-wide cap was reached; retry later.
    Capacity,
}

impl DenyReason {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            DenyReason::InvalidToken => 0,
            DenyReason::DuplicateToken => 1,
            DenyReason::RoomFull => 2,
            DenyReason::RoomNotFound => 3,
            DenyReason::AlreadyMember => 4,
            DenyReason::BadPassword => 5,
            DenyReason::Capacity => 6,
        }
    }
}

impl TryFrom<u8> for DenyReason {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DenyReason::InvalidToken),
            1 => Ok(DenyReason::DuplicateToken),
            2 => Ok(DenyReason::RoomFull),
            3 => Ok(DenyReason::RoomNotFound),
            4 => Ok(DenyReason::AlreadyMember),
            5 => Ok(DenyReason::BadPassword),
            6 => Ok(DenyReason::Capacity),
            _ => Err(DecodeError::Message),
        }
    }
}

/// Why a peer link was torn down or could not be established.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LinkFailReason {
    /// The peer left the room.
    PeerLeft,
    /// The peer's session expired from silence.
    PeerExpired,
    /// Negotiation and relay both failed after all retries.
    RetriesExhausted,
    /// The relay could not admit another channel.
    RelayCapacity,
}

impl LinkFailReason {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            LinkFailReason::PeerLeft => 0,
            LinkFailReason::PeerExpired => 1,
            LinkFailReason::RetriesExhausted => 2,
            LinkFailReason::RelayCapacity => 3,
        }
    }
}

impl TryFrom<u8> for LinkFailReason {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LinkFailReason::PeerLeft),
            1 => Ok(LinkFailReason::PeerExpired),
            2 => Ok(LinkFailReason::RetriesExhausted),
            3 => Ok(LinkFailReason::RelayCapacity),
            _ => Err(DecodeError::Message),
        }
    }
}

impl fmt::Display for LinkFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkFailReason::PeerLeft => "peer left the room",
            LinkFailReason::PeerExpired => "peer session expired",
            LinkFailReason::RetriesExhausted => "negotiation retries exhausted",
            LinkFailReason::RelayCapacity => "relay capacity exhausted",
        };
        f.write_str(text)
    }
}

/// A facilitator protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    // Client -> server.
    /// Opens a session with an authentication token and declared local candidates.
    Register {
        /// Authentication token; validated by the server's pluggable validator.
        token: String,
        /// Addresses the client can be reached at on its own network.
        local_endpoints: Vec<SocketAddr>,
    },
    /// Creates a room.
    CreateRoom {
        /// Human-readable name.
        name: String,
        /// Maximum member count.
        capacity: u16,
        /// Discovery/join policy.
        visibility: Visibility,
        /// Required when visibility is password-protected.
        password: Option<String>,
    },
    /// Joins a room by id or criteria.
    JoinRoom {
        /// What to join.
        target: RoomTarget,
        /// Password for protected rooms.
        password: Option<String>,
    },
    /// Leaves the current room.
    LeaveRoom,
    /// Requests a room listing.
    ListRooms {
        /// Listing filter.
        filter: RoomFilter,
    },
    /// Reports the outcome of this side's punch attempts for one peer.
    PunchReport {
        /// The peer the punches targeted.
        peer_session: SessionId,
        /// The candidate that answered, or None if every candidate failed.
        succeeded: Option<SocketAddr>,
    },

    // Server -> client.
    /// Registration accepted.
    RegisterAck {
        /// The id assigned to this session.
        session_id: SessionId,
    },
    /// Registration rejected.
    AuthDenied {
        /// Why.
        reason: DenyReason,
    },
    /// Room created.
    RoomCreated {
        /// Id of the new room.
        room_id: RoomId,
    },
    /// Join succeeded.
    RoomJoined {
        /// The joined room.
        room_id: RoomId,
        /// Members before this join, in join order (first is the host).
        members: Vec<SessionId>,
    },
    /// A room request was denied.
    RequestDenied {
        /// Why.
        reason: DenyReason,
    },
    /// Leave acknowledged.
    RoomLeft,
    /// Room listing.
    RoomList {
        /// Matching rooms.
        rooms: Vec<RoomSummary>,
    },
    /// Candidate set of a peer, starting the punch window.
    CandidateExchange {
        /// The peer to punch toward.
        peer_session: SessionId,
        /// The peer's candidate endpoints.
        endpoints: Vec<Endpoint>,
        /// True if this side should begin probing first.
        initiator: bool,
    },
    /// Traffic for this peer now flows through the relay.
    RelayEstablished {
        /// The peer on the other leg.
        peer_session: SessionId,
        /// Relay channel to address payloads to.
        channel_id: ChannelId,
    },
    /// The link to a peer failed.
    LinkFailed {
        /// The peer.
        peer_session: SessionId,
        /// Why.
        reason: LinkFailReason,
    },

    // Either direction.
    /// Application payload forwarded through a relay channel.
    RelayData {
        /// Channel the payload belongs to.
        channel_id: ChannelId,
        /// Forwarding sequence assigned per leg by the relay.
        sequence: u32,
        /// Delivery mode the sender requested end-to-end.
        mode: DeliveryMode,
        /// Application payload.
        payload: SharedBytes,
    },

    // Peer <-> peer.
    /// Hole-punch probe sent to a candidate endpoint.
    PunchProbe {
        /// Session id of the probing side.
        from_session: SessionId,
    },
    /// Answer to a received punch probe.
    PunchAck {
        /// Session id of the answering side.
        from_session: SessionId,
    },
    /// Application payload on an established direct link.
    PeerPayload {
        /// Application payload.
        payload: SharedBytes,
    },
}

impl Message {
    /// Wire tag for the message kind.
    pub fn kind(&self) -> u8 {
        match self {
            Message::Register { .. } => 1,
            Message::CreateRoom { .. } => 2,
            Message::JoinRoom { .. } => 3,
            Message::LeaveRoom => 4,
            Message::ListRooms { .. } => 5,
            Message::PunchReport { .. } => 6,
            Message::RegisterAck { .. } => 16,
            Message::AuthDenied { .. } => 17,
            Message::RoomCreated { .. } => 18,
            Message::RoomJoined { .. } => 19,
            Message::RequestDenied { .. } => 20,
            Message::RoomLeft => 21,
            Message::RoomList { .. } => 22,
            Message::CandidateExchange { .. } => 23,
            Message::RelayEstablished { .. } => 24,
            Message::LinkFailed { .. } => 25,
            Message::RelayData { .. } => 32,
            Message::PunchProbe { .. } => 48,
            Message::PunchAck { .. } => 49,
            Message::PeerPayload { .. } => 50,
        }
    }
}
