use std::net::SocketAddr;
use std::time::Instant;

/// A UDP payload as it came off the socket.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub from: SocketAddr,
    pub received: Instant,
    pub payload: Vec<u8>,
}

impl Datagram {
    pub fn new(from: SocketAddr, payload: &[u8]) -> Self {
        Datagram { from, received: Instant::now(), payload: payload.to_vec() }
    }
}
