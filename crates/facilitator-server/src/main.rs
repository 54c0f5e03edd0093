//! Facilitator server binary.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use facilitator_core::config::FacilitatorConfig;
use facilitator_server::Facilitator;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Rendezvous and relay service for collaborative VR sessions.
#[derive(Parser, Debug)]
#[command(name = "facilitator-server", version, about)]
struct Args {
    /// Address to bind the UDP socket to.
    #[arg(long, default_value = "0.0.0.0:4567")]
    bind: SocketAddr,

    /// Maximum concurrently registered sessions.
    #[arg(long, default_value_t = 1024)]
    max_sessions: usize,

    /// Maximum concurrently existing rooms.
    #[arg(long, default_value_t = 256)]
    max_rooms: usize,

    /// Maximum concurrently open relay channels.
    #[arg(long, default_value_t = 512)]
    max_relay_channels: usize,

    /// Session liveness timeout in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    session_timeout_ms: u64,

    /// Hole-punch negotiation window in milliseconds.
    #[arg(long, default_value_t = 3_000)]
    punch_window_ms: u64,

    /// Negotiation retries after a failed relay setup.
    #[arg(long, default_value_t = 2)]
    link_retry_cap: u8,

    /// Grace period for empty rooms in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    room_empty_ttl_ms: u64,

    /// Per-relay-channel byte quota per second (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    relay_bytes_per_sec: u32,

    /// Per-relay-channel datagram quota per second (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    relay_datagrams_per_sec: u32,
}

fn main() -> facilitator_core::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = FacilitatorConfig {
        max_sessions: args.max_sessions,
        max_rooms: args.max_rooms,
        max_relay_channels: args.max_relay_channels,
        session_timeout: Duration::from_millis(args.session_timeout_ms),
        punch_window: Duration::from_millis(args.punch_window_ms),
        link_retry_cap: args.link_retry_cap,
        room_empty_ttl: Duration::from_millis(args.room_empty_ttl_ms),
        relay_bytes_per_sec: args.relay_bytes_per_sec,
        relay_datagrams_per_sec: args.relay_datagrams_per_sec,
        ..FacilitatorConfig::default()
    };

    let server = Facilitator::bind(args.bind, config)?;
    info!("facilitator listening on {}", server.local_addr()?);
    server.run()
}
