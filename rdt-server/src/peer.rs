//! Per-connection server-side state, grounded on
//! `original_source/src/server.py`'s `self.clients[client_socket]` dict
//! and on the teacher's `Endpoint`/channel-per-connection shape in
//! `t51core/src/net/mod.rs` and `net/endpoint.rs`.

use std::net::SocketAddr;
use std::time::Instant;

use rdt_core::cipher::CipherManager;
use rdt_core::Engine;

pub type PeerId = u64;

pub struct PeerSession {
    pub address: SocketAddr,
    pub engine: Option<Engine>,
    pub message_buffer: String,
    pub handshake_completed: bool,
    pub connected_at: Instant,
    pub max_message_size: usize,
    pub cipher: Option<CipherManager>,
}

impl PeerSession {
    pub fn new(address: SocketAddr) -> Self {
        PeerSession {
            address,
            engine: None,
            message_buffer: String::new(),
            handshake_completed: false,
            connected_at: Instant::now(),
            max_message_size: 0,
            cipher: None,
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.connected_at.elapsed().as_secs_f64()
    }
}
