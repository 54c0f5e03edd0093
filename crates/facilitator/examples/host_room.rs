//! Registers with a facilitator, creates a public room, and greets every
//! peer that connects.
//!
//! Run the server first:
//! - cargo run -p facilitator-server -- --bind 127.0.0.1:4567
//!
//! Then:
//! - cargo run -p facilitator --example host_room -- 127.0.0.1:4567

use std::{env, net::SocketAddr, thread, time::{Duration, Instant}};

use facilitator::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4567".to_string())
        .parse()?;

    let mut client = FacilitatorClient::connect(server, "host-token")?;
    println!("connecting to facilitator at {}", server);

    loop {
        for event in client.poll(Instant::now()) {
            match event {
                ClientEvent::Registered(session_id) => {
                    println!("[registered] {}", session_id);
                    client.create_room("demo", 8, Visibility::Public, None);
                }
                ClientEvent::RoomCreated(room_id) => {
                    println!("[room created] {}", room_id);
                    client.join_room(RoomTarget::Id(room_id), None);
                }
                ClientEvent::RoomJoined { room_id, members } => {
                    println!("[joined] {} with {} prior members", room_id, members.len());
                }
                ClientEvent::PeerDirect(peer) => {
                    println!("[peer direct] {}", peer);
                    client.send_to_peer(peer, b"welcome!".to_vec(), DeliveryMode::ReliableOrdered)?;
                }
                ClientEvent::PeerRelayed(peer) => {
                    println!("[peer relayed] {}", peer);
                    client.send_to_peer(peer, b"welcome!".to_vec(), DeliveryMode::ReliableOrdered)?;
                }
                ClientEvent::Data { from, payload, mode } => {
                    println!(
                        "[data] from={} mode={:?} payload=\"{}\"",
                        from,
                        mode,
                        String::from_utf8_lossy(payload.as_slice())
                    );
                }
                ClientEvent::LinkFailed { peer, reason } => {
                    println!("[link failed] {}: {}", peer, reason);
                }
                other => println!("[event] {:?}", other),
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
}
