use std::net::SocketAddr;

use anyhow::Context;
use bytes::{Bytes, BytesMut};
use hush_dns::{MAX_MESSAGE_SIZE, helpers};
use tokio::{net::UdpSocket, time::Instant};

/// A single UDP exchange with an upstream server.
#[derive(Debug)]
pub(crate) struct UdpConn {
    pub socket: UdpSocket,
}

impl UdpConn {
    /// Bind an ephemeral port (source port randomization) connected to `upstream_addr`.
    pub async fn new(upstream_addr: SocketAddr) -> anyhow::Result<Self> {
        let bind_addr = if upstream_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(upstream_addr).await?;
        Ok(Self { socket })
    }

    /// Send a DNS query and wait for the matching response, ignoring stray datagrams.
    pub async fn send_and_receive(&self, query: &[u8], deadline: Instant) -> anyhow::Result<Bytes> {
        let want_id = helpers::extract_transaction_id(query).context("query too short")?;

        tokio::time::timeout_at(deadline, self.socket.send(query))
            .await
            .context("send timeout")??;

        let mut buf = BytesMut::zeroed(MAX_MESSAGE_SIZE);

        loop {
            let n = tokio::time::timeout_at(deadline, self.socket.recv(&mut buf))
                .await
                .context("recv timeout")??;

            let datagram = &buf[..n];
            if helpers::is_response(datagram) == Some(true) && helpers::extract_transaction_id(datagram) == Some(want_id)
            {
                buf.truncate(n);
                return Ok(buf.freeze());
            }
        }
    }
}
