//! Binary encoding and decoding for frames and messages.
//!
//! Everything is big-endian, hand-framed with `byteorder`. Frames carry a
//! two-byte header (protocol version, command count) followed by tagged
//! commands; messages are a single tagged body inside a transport payload.

use std::{
    io::{self, Cursor, Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use facilitator_core::{
    constants::PROTOCOL_VERSION,
    error::DecodeError,
    shared::SharedBytes,
};

use crate::{
    frame::{Frame, FrameCommand},
    message::{
        DenyReason, Endpoint, EndpointKind, LinkFailReason, Message, RoomFilter, RoomId,
        RoomSummary, RoomTarget, SessionId, Visibility, ChannelId,
    },
    packet::DeliveryMode,
};

// ---------------------------------------------------------------------------
// Wire primitives
// ---------------------------------------------------------------------------

fn write_string(buffer: &mut Vec<u8>, value: &str) -> io::Result<()> {
    buffer.write_u16::<BigEndian>(value.len() as u16)?;
    buffer.write_all(value.as_bytes())
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> io::Result<String> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "non-utf8 string field"))
}

fn write_opt_string(buffer: &mut Vec<u8>, value: &Option<String>) -> io::Result<()> {
    match value {
        Some(s) => {
            buffer.write_u8(1)?;
            write_string(buffer, s)
        }
        None => buffer.write_u8(0),
    }
}

fn read_opt_string(cursor: &mut Cursor<&[u8]>) -> io::Result<Option<String>> {
    Ok(match cursor.read_u8()? {
        0 => None,
        _ => Some(read_string(cursor)?),
    })
}

fn write_addr(buffer: &mut Vec<u8>, addr: &SocketAddr) -> io::Result<()> {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buffer.write_u8(4)?;
            buffer.write_all(&ip.octets())?;
        }
        IpAddr::V6(ip) => {
            buffer.write_u8(6)?;
            buffer.write_all(&ip.octets())?;
        }
    }
    buffer.write_u16::<BigEndian>(addr.port())
}

fn read_addr(cursor: &mut Cursor<&[u8]>) -> io::Result<SocketAddr> {
    let ip = match cursor.read_u8()? {
        4 => {
            let mut octets = [0u8; 4];
            cursor.read_exact(&mut octets)?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        6 => {
            let mut octets = [0u8; 16];
            cursor.read_exact(&mut octets)?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown address family")),
    };
    let port = cursor.read_u16::<BigEndian>()?;
    Ok(SocketAddr::new(ip, port))
}

fn write_bytes(buffer: &mut Vec<u8>, data: &[u8]) -> io::Result<()> {
    buffer.write_u16::<BigEndian>(data.len() as u16)?;
    buffer.write_all(data)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> io::Result<SharedBytes> {
    let len = cursor.read_u16::<BigEndian>()? as usize;
    let mut data = vec![0u8; len];
    cursor.read_exact(&mut data)?;
    Ok(SharedBytes::from_vec(data))
}

fn invalid<T>(what: &'static str) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, what))
}

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

/// Serializes frames for transmission.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Appends one command to the buffer.
    pub fn encode_command_into(buffer: &mut Vec<u8>, command: &FrameCommand) -> io::Result<()> {
        buffer.write_u8(command.command_type())?;
        match command {
            FrameCommand::SendUnreliable { channel_id, data } => {
                buffer.write_u8(*channel_id)?;
                write_bytes(buffer, data.as_slice())?;
            }
            FrameCommand::SendReliable { channel_id, sequence, ordered, data } => {
                buffer.write_u8(*channel_id)?;
                buffer.write_u16::<BigEndian>(*sequence)?;
                buffer.write_u8(u8::from(*ordered))?;
                write_bytes(buffer, data.as_slice())?;
            }
            FrameCommand::Acknowledge { sequence, received_mask } => {
                buffer.write_u16::<BigEndian>(*sequence)?;
                buffer.write_u32::<BigEndian>(*received_mask)?;
            }
            FrameCommand::ResendRequest { channel_id, sequence } => {
                buffer.write_u8(*channel_id)?;
                buffer.write_u16::<BigEndian>(*sequence)?;
            }
            FrameCommand::Ping { nonce } => {
                buffer.write_u32::<BigEndian>(*nonce)?;
            }
            FrameCommand::Pong { nonce } => {
                buffer.write_u32::<BigEndian>(*nonce)?;
            }
            FrameCommand::Disconnect { reason } => {
                buffer.write_u8(*reason)?;
            }
        }
        Ok(())
    }

    /// Appends a whole frame (header plus commands) to the buffer.
    pub fn encode_frame_into(buffer: &mut Vec<u8>, frame: &Frame) -> io::Result<()> {
        debug_assert!(frame.len() <= u8::MAX as usize);
        buffer.write_u8(PROTOCOL_VERSION)?;
        buffer.write_u8(frame.len() as u8)?;
        for command in &frame.commands {
            Self::encode_command_into(buffer, command)?;
        }
        Ok(())
    }

    /// Encodes a frame into a fresh buffer.
    pub fn encode_frame(frame: &Frame) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(64);
        Self::encode_frame_into(&mut buffer, frame).expect("Vec writes are infallible");
        buffer
    }

    /// Encoded size of one command, header excluded.
    pub fn command_len(command: &FrameCommand) -> usize {
        let body = match command {
            FrameCommand::SendUnreliable { data, .. } => 1 + 2 + data.len(),
            FrameCommand::SendReliable { data, .. } => 1 + 2 + 1 + 2 + data.len(),
            FrameCommand::Acknowledge { .. } => 2 + 4,
            FrameCommand::ResendRequest { .. } => 1 + 2,
            FrameCommand::Ping { .. } | FrameCommand::Pong { .. } => 4,
            FrameCommand::Disconnect { .. } => 1,
        };
        1 + body
    }
}

/// Deserializes frames received from the network.
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decodes one command from the cursor.
    pub fn decode_command(cursor: &mut Cursor<&[u8]>) -> io::Result<FrameCommand> {
        let tag = cursor.read_u8()?;
        let command = match tag {
            1 => FrameCommand::SendUnreliable {
                channel_id: cursor.read_u8()?,
                data: read_bytes(cursor)?,
            },
            2 => FrameCommand::SendReliable {
                channel_id: cursor.read_u8()?,
                sequence: cursor.read_u16::<BigEndian>()?,
                ordered: cursor.read_u8()? != 0,
                data: read_bytes(cursor)?,
            },
            3 => FrameCommand::Acknowledge {
                sequence: cursor.read_u16::<BigEndian>()?,
                received_mask: cursor.read_u32::<BigEndian>()?,
            },
            4 => FrameCommand::ResendRequest {
                channel_id: cursor.read_u8()?,
                sequence: cursor.read_u16::<BigEndian>()?,
            },
            5 => FrameCommand::Ping { nonce: cursor.read_u32::<BigEndian>()? },
            6 => FrameCommand::Pong { nonce: cursor.read_u32::<BigEndian>()? },
            7 => FrameCommand::Disconnect { reason: cursor.read_u8()? },
            _ => return invalid("unknown frame command"),
        };
        Ok(command)
    }

    /// Decodes a whole datagram into a frame.
    pub fn decode_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u8().map_err(|_| DecodeError::FrameHeader)?;
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::FrameHeader);
        }
        let count = cursor.read_u8().map_err(|_| DecodeError::FrameHeader)?;
        let mut frame = Frame::new();
        for _ in 0..count {
            frame.push(Self::decode_command(&mut cursor).map_err(|_| DecodeError::FrameCommand)?);
        }
        Ok(frame)
    }
}

// ---------------------------------------------------------------------------
// Message codec
// ---------------------------------------------------------------------------

/// Serializes and deserializes facilitator messages.
pub struct MessageCodec;

impl MessageCodec {
    /// Appends an encoded message to the buffer.
    pub fn encode_into(buffer: &mut Vec<u8>, message: &Message) -> io::Result<()> {
        buffer.write_u8(message.kind())?;
        match message {
            Message::Register { token, local_endpoints } => {
                write_string(buffer, token)?;
                buffer.write_u8(local_endpoints.len() as u8)?;
                for addr in local_endpoints {
                    write_addr(buffer, addr)?;
                }
            }
            Message::CreateRoom { name, capacity, visibility, password } => {
                write_string(buffer, name)?;
                buffer.write_u16::<BigEndian>(*capacity)?;
                buffer.write_u8(visibility.to_u8())?;
                write_opt_string(buffer, password)?;
            }
            Message::JoinRoom { target, password } => {
                match target {
                    RoomTarget::Id(room_id) => {
                        buffer.write_u8(0)?;
                        buffer.write_u64::<BigEndian>(room_id.0)?;
                    }
                    RoomTarget::Match { name } => {
                        buffer.write_u8(1)?;
                        write_opt_string(buffer, name)?;
                    }
                }
                write_opt_string(buffer, password)?;
            }
            Message::LeaveRoom | Message::RoomLeft => {}
            Message::ListRooms { filter } => {
                buffer.write_u8(u8::from(filter.include_full))?;
                write_opt_string(buffer, &filter.name_prefix)?;
            }
            Message::PunchReport { peer_session, succeeded } => {
                buffer.write_u64::<BigEndian>(peer_session.0)?;
                match succeeded {
                    Some(addr) => {
                        buffer.write_u8(1)?;
                        write_addr(buffer, addr)?;
                    }
                    None => buffer.write_u8(0)?,
                }
            }
            Message::RegisterAck { session_id } => {
                buffer.write_u64::<BigEndian>(session_id.0)?;
            }
            Message::AuthDenied { reason } | Message::RequestDenied { reason } => {
                buffer.write_u8(reason.to_u8())?;
            }
            Message::RoomCreated { room_id } => {
                buffer.write_u64::<BigEndian>(room_id.0)?;
            }
            Message::RoomJoined { room_id, members } => {
                buffer.write_u64::<BigEndian>(room_id.0)?;
                buffer.write_u16::<BigEndian>(members.len() as u16)?;
                for member in members {
                    buffer.write_u64::<BigEndian>(member.0)?;
                }
            }
            Message::RoomList { rooms } => {
                buffer.write_u16::<BigEndian>(rooms.len() as u16)?;
                for room in rooms {
                    buffer.write_u64::<BigEndian>(room.room_id.0)?;
                    write_string(buffer, &room.name)?;
                    buffer.write_u8(room.visibility.to_u8())?;
                    buffer.write_u16::<BigEndian>(room.capacity)?;
                    buffer.write_u16::<BigEndian>(room.members)?;
                }
            }
            Message::CandidateExchange { peer_session, endpoints, initiator } => {
                buffer.write_u64::<BigEndian>(peer_session.0)?;
                buffer.write_u8(endpoints.len() as u8)?;
                for endpoint in endpoints {
                    buffer.write_u8(endpoint.kind.to_u8())?;
                    write_addr(buffer, &endpoint.addr)?;
                }
                buffer.write_u8(u8::from(*initiator))?;
            }
            Message::RelayEstablished { peer_session, channel_id } => {
                buffer.write_u64::<BigEndian>(peer_session.0)?;
                buffer.write_u64::<BigEndian>(channel_id.0)?;
            }
            Message::LinkFailed { peer_session, reason } => {
                buffer.write_u64::<BigEndian>(peer_session.0)?;
                buffer.write_u8(reason.to_u8())?;
            }
            Message::RelayData { channel_id, sequence, mode, payload } => {
                buffer.write_u64::<BigEndian>(channel_id.0)?;
                buffer.write_u32::<BigEndian>(*sequence)?;
                buffer.write_u8(mode.to_u8())?;
                write_bytes(buffer, payload.as_slice())?;
            }
            Message::PunchProbe { from_session } | Message::PunchAck { from_session } => {
                buffer.write_u64::<BigEndian>(from_session.0)?;
            }
            Message::PeerPayload { payload } => {
                write_bytes(buffer, payload.as_slice())?;
            }
        }
        Ok(())
    }

    /// Encodes a message into a fresh buffer.
    pub fn encode(message: &Message) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(32);
        Self::encode_into(&mut buffer, message).expect("Vec writes are infallible");
        buffer
    }

    /// Decodes a message from a transport payload.
    pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        Self::decode_inner(&mut cursor).map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidInput {
                DecodeError::StringField
            } else {
                DecodeError::Message
            }
        })
    }

    fn decode_inner(cursor: &mut Cursor<&[u8]>) -> io::Result<Message> {
        let kind = cursor.read_u8()?;
        let message = match kind {
            1 => {
                let token = read_string(cursor)?;
                let count = cursor.read_u8()?;
                let mut local_endpoints = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    local_endpoints.push(read_addr(cursor)?);
                }
                Message::Register { token, local_endpoints }
            }
            2 => Message::CreateRoom {
                name: read_string(cursor)?,
                capacity: cursor.read_u16::<BigEndian>()?,
                visibility: Self::read_visibility(cursor)?,
                password: read_opt_string(cursor)?,
            },
            3 => {
                let target = match cursor.read_u8()? {
                    0 => RoomTarget::Id(RoomId(cursor.read_u64::<BigEndian>()?)),
                    1 => RoomTarget::Match { name: read_opt_string(cursor)? },
                    _ => return invalid("unknown join target"),
                };
                Message::JoinRoom { target, password: read_opt_string(cursor)? }
            }
            4 => Message::LeaveRoom,
            5 => Message::ListRooms {
                filter: RoomFilter {
                    include_full: cursor.read_u8()? != 0,
                    name_prefix: read_opt_string(cursor)?,
                },
            },
            6 => {
                let peer_session = SessionId(cursor.read_u64::<BigEndian>()?);
                let succeeded = match cursor.read_u8()? {
                    0 => None,
                    _ => Some(read_addr(cursor)?),
                };
                Message::PunchReport { peer_session, succeeded }
            }
            16 => Message::RegisterAck { session_id: SessionId(cursor.read_u64::<BigEndian>()?) },
            17 => Message::AuthDenied { reason: Self::read_deny(cursor)? },
            18 => Message::RoomCreated { room_id: RoomId(cursor.read_u64::<BigEndian>()?) },
            19 => {
                let room_id = RoomId(cursor.read_u64::<BigEndian>()?);
                let count = cursor.read_u16::<BigEndian>()?;
                let mut members = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    members.push(SessionId(cursor.read_u64::<BigEndian>()?));
                }
                Message::RoomJoined { room_id, members }
            }
            20 => Message::RequestDenied { reason: Self::read_deny(cursor)? },
            21 => Message::RoomLeft,
            22 => {
                let count = cursor.read_u16::<BigEndian>()?;
                let mut rooms = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    rooms.push(RoomSummary {
                        room_id: RoomId(cursor.read_u64::<BigEndian>()?),
                        name: read_string(cursor)?,
                        visibility: Self::read_visibility(cursor)?,
                        capacity: cursor.read_u16::<BigEndian>()?,
                        members: cursor.read_u16::<BigEndian>()?,
                    });
                }
                Message::RoomList { rooms }
            }
            23 => {
                let peer_session = SessionId(cursor.read_u64::<BigEndian>()?);
                let count = cursor.read_u8()?;
                let mut endpoints = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let kind = EndpointKind::try_from(cursor.read_u8()?)
                        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "endpoint kind"))?;
                    endpoints.push(Endpoint { addr: read_addr(cursor)?, kind });
                }
                Message::CandidateExchange {
                    peer_session,
                    endpoints,
                    initiator: cursor.read_u8()? != 0,
                }
            }
            24 => Message::RelayEstablished {
                peer_session: SessionId(cursor.read_u64::<BigEndian>()?),
                channel_id: ChannelId(cursor.read_u64::<BigEndian>()?),
            },
            25 => {
                let peer_session = SessionId(cursor.read_u64::<BigEndian>()?);
                let reason = LinkFailReason::try_from(cursor.read_u8()?)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "fail reason"))?;
                Message::LinkFailed { peer_session, reason }
            }
            32 => {
                let channel_id = ChannelId(cursor.read_u64::<BigEndian>()?);
                let sequence = cursor.read_u32::<BigEndian>()?;
                let mode = DeliveryMode::try_from(cursor.read_u8()?)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "delivery mode"))?;
                Message::RelayData { channel_id, sequence, mode, payload: read_bytes(cursor)? }
            }
            48 => Message::PunchProbe { from_session: SessionId(cursor.read_u64::<BigEndian>()?) },
            49 => Message::PunchAck { from_session: SessionId(cursor.read_u64::<BigEndian>()?) },
            50 => Message::PeerPayload { payload: read_bytes(cursor)? },
            _ => return invalid("unknown message kind"),
        };
        Ok(message)
    }

    fn read_visibility(cursor: &mut Cursor<&[u8]>) -> io::Result<Visibility> {
        Visibility::try_from(cursor.read_u8()?)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "visibility"))
    }

    fn read_deny(cursor: &mut Cursor<&[u8]>) -> io::Result<DenyReason> {
        DenyReason::try_from(cursor.read_u8()?)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "deny reason"))
    }
}
