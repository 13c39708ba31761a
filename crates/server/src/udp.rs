use std::sync::Arc;

use bytes::BytesMut;
use hush_context::RequestType;
use hush_dns::{DnsMessage, MIN_UDP_PAYLOAD};
use tokio::net::UdpSocket;

use crate::{
    ServerState,
    handler::{handle_query, truncated_response},
};

/// Datagrams filling the whole buffer are treated as oversized and dropped.
const RECV_SIZE: usize = 4096;

/// Run the DNS server over UDP.
pub(crate) async fn run_udp<G, L>(socket: UdpSocket, state: Arc<ServerState<G, L>>) -> anyhow::Result<()>
where
    G: Send + Sync + 'static,
    L: Default + Send + Sync + 'static,
{
    let socket = Arc::new(socket);
    let mut buffer = BytesMut::with_capacity(RECV_SIZE);

    loop {
        buffer.resize(RECV_SIZE, 0);
        let (len, client) = match socket.recv_from(&mut buffer[..]).await {
            Ok(r) => r,
            Err(e) => {
                // ICMP errors from earlier sends surface here on some platforms.
                tracing::debug!("UDP recv error: {e}");
                continue;
            }
        };

        if len >= RECV_SIZE {
            tracing::debug!(client = %client, "dropping oversized datagram");
            continue;
        }

        let raw = buffer.split_to(len).freeze();
        let sock = socket.clone();
        let state = state.clone();

        tokio::spawn(async move {
            let Some(handled) = handle_query(&state, RequestType::UDP, client, raw).await else {
                return;
            };

            let limit = udp_payload_limit(handled.ctx.message());
            let sent = if handled.response.len() > limit {
                truncated_response(handled.ctx.message(), &handled.response)
            } else {
                Some(handled.response.clone())
            };

            if let Some(bytes) = sent {
                if let Err(e) = sock.send_to(&bytes, client).await {
                    tracing::warn!("Failed to write response to client {}: {}", client, e);
                }
            }

            handled.finish(&state).await;
        });
    }
}

/// Largest reply the client accepts over UDP: its EDNS size, never below 512.
fn udp_payload_limit(query: &DnsMessage) -> usize {
    query
        .edns_udp_payload_size()
        .map(usize::from)
        .unwrap_or(MIN_UDP_PAYLOAD)
        .max(MIN_UDP_PAYLOAD)
}
