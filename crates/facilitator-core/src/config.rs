use std::{default::Default, time::Duration};

use crate::constants::DEFAULT_MTU;

/// Tuning options for the reliable-UDP transport layer.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Max idle time before a link is considered dead.
    pub idle_timeout: Duration,
    /// Interval for heartbeat pings when both directions are idle. None disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Max payload size accepted for a single send.
    pub max_payload_size: usize,
    /// Max receive buffer size in bytes.
    pub receive_buffer_size: usize,
    /// Base delay before the first retransmission of an unacknowledged packet.
    /// Subsequent attempts double the delay up to `retransmit_delay_cap`.
    pub retransmit_base: Duration,
    /// Upper bound on the per-attempt retransmission delay.
    pub retransmit_delay_cap: Duration,
    /// Retransmission attempts before the link is reported failed.
    pub max_retransmit_attempts: u8,
    /// Reorder window size for ordered channels. Arrivals further than this
    /// ahead of the expected sequence are dropped and trigger a resend request.
    pub reorder_window: u16,
    /// Max reliable packets in flight before the link is dropped.
    pub max_packets_in_flight: u16,
    /// Max links that have not yet completed a send/receive exchange.
    pub max_unestablished_links: u16,
    /// How long to block when polling socket events.
    pub polling_timeout: Option<Duration>,
    /// Socket receive buffer size in bytes (None = system default, SO_RCVBUF).
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default, SO_SNDBUF).
    pub socket_send_buffer_size: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            blocking_mode: false,
            idle_timeout: Duration::from_secs(5),
            heartbeat_interval: Some(Duration::from_secs(1)),
            max_payload_size: DEFAULT_MTU as usize - 64,
            receive_buffer_size: DEFAULT_MTU as usize,
            retransmit_base: Duration::from_millis(100),
            retransmit_delay_cap: Duration::from_secs(2),
            max_retransmit_attempts: 8,
            reorder_window: 64,
            max_packets_in_flight: 512,
            max_unestablished_links: 50,
            polling_timeout: Some(Duration::from_millis(1)),
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
        }
    }
}

/// Service-level limits and timing for the facilitator.
///
/// The rendezvous window, retry cap, and relay quotas are deployment policy;
/// they have neutral defaults here and are expected to be set from the
/// server's command line or embedding application.
#[derive(Clone, Debug)]
pub struct FacilitatorConfig {
    /// Transport tuning shared by every link the server maintains.
    pub transport: TransportConfig,
    /// Max concurrently registered sessions.
    pub max_sessions: usize,
    /// Max concurrently existing rooms.
    pub max_rooms: usize,
    /// Max room capacity a client may request at creation.
    pub max_room_capacity: u16,
    /// Max concurrently open relay channels.
    pub max_relay_channels: usize,
    /// Silence beyond this duration expires a session.
    pub session_timeout: Duration,
    /// Cadence of the periodic expiry sweep.
    pub sweep_interval: Duration,
    /// Hole-punch negotiation window per attempt.
    pub punch_window: Duration,
    /// Cadence at which clients re-send punch probes within the window.
    pub punch_interval: Duration,
    /// Times a failed pairing may re-enter negotiation before it is failed for good.
    pub link_retry_cap: u8,
    /// How long an emptied room lingers before destruction (reconnect grace).
    pub room_empty_ttl: Duration,
    /// Relay bytes-per-second quota per channel (0 = unlimited).
    pub relay_bytes_per_sec: u32,
    /// Relay datagrams-per-second quota per channel (0 = unlimited).
    pub relay_datagrams_per_sec: u32,
    /// Reliable datagrams queued per relay leg while over quota before dropping.
    pub relay_backlog_limit: usize,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            max_sessions: 1024,
            max_rooms: 256,
            max_room_capacity: 64,
            max_relay_channels: 512,
            session_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            punch_window: Duration::from_secs(3),
            punch_interval: Duration::from_millis(150),
            link_retry_cap: 2,
            room_empty_ttl: Duration::from_secs(30),
            relay_bytes_per_sec: 0,
            relay_datagrams_per_sec: 0,
            relay_backlog_limit: 256,
        }
    }
}
