use log::{debug, error, trace};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::entity::datagram::Datagram;
use crate::error::{Error, Result};
use crate::flow::codec::decode_header;
use crate::flow::ExporterId;
use crate::metrics::Metrics;
use crate::threads::worker::Dispatcher;

/// Reads datagrams until the socket fails.
///
/// Only the message header is looked at here, to find the exporter. Everything else
/// happens in the exporter's worker.
pub async fn listen(socket: &UdpSocket, dispatcher: &mut Dispatcher, metrics: Arc<Metrics>, recv_buffer: usize) -> Result<()> {
    let mut buf = vec![0u8; recv_buffer.max(64)];

    loop {
        let (received_bytes, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("Failed to read from the udp socket: {}", e);
                return Err(Error::Transport(e));
            }
        };
        trace!("Received {} bytes from {}", received_bytes, from);

        Metrics::incr(&metrics.packets_received);
        metrics.bytes_received.fetch_add(received_bytes as u64, std::sync::atomic::Ordering::Relaxed);

        let payload = &buf[..received_bytes];
        let header = match decode_header(payload) {
            Ok(header) => header,
            Err(e) => {
                Metrics::incr(&metrics.malformed_packets);
                debug!("Dropping datagram from {}: {}", from, e);
                continue;
            }
        };

        dispatcher.dispatch(ExporterId::new(from, header.domain_id), Datagram::new(from, payload));
    }
}
