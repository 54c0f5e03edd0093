//! Registers with a facilitator, joins any open public room, and echoes
//! every payload a peer sends.
//!
//! Run the server and the host_room example first, then:
//! - cargo run -p facilitator --example join_room -- 127.0.0.1:4567

use std::{env, net::SocketAddr, thread, time::{Duration, Instant}};

use facilitator::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4567".to_string())
        .parse()?;

    let mut client = FacilitatorClient::connect(server, "joiner-token")?;
    println!("connecting to facilitator at {}", server);

    loop {
        for event in client.poll(Instant::now()) {
            match event {
                ClientEvent::Registered(session_id) => {
                    println!("[registered] {}", session_id);
                    client.join_any();
                }
                ClientEvent::RequestDenied(reason) => {
                    println!("[denied] {:?}; retrying shortly", reason);
                    thread::sleep(Duration::from_secs(1));
                    client.join_any();
                }
                ClientEvent::RoomJoined { room_id, members } => {
                    println!("[joined] {} with {} prior members", room_id, members.len());
                }
                ClientEvent::PeerDirect(peer) => println!("[peer direct] {}", peer),
                ClientEvent::PeerRelayed(peer) => println!("[peer relayed] {}", peer),
                ClientEvent::Data { from, payload, mode } => {
                    println!(
                        "[data] from={} mode={:?} payload=\"{}\"",
                        from,
                        mode,
                        String::from_utf8_lossy(payload.as_slice())
                    );
                    client.send_to_peer(from, payload.as_slice().to_vec(), mode)?;
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
