use std::net::SocketAddr;

use anyhow::Context;
use bytes::Bytes;
use hush_dns::helpers;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{Instant, timeout_at},
};

/// One query over a fresh TCP connection (RFC 1035 length-prefixed framing).
pub(crate) async fn exchange(upstream_addr: SocketAddr, query: &[u8], deadline: Instant) -> anyhow::Result<Bytes> {
    let len = u16::try_from(query.len()).context("query too large for DNS/TCP")?;
    let want_id = helpers::extract_transaction_id(query).context("query too short")?;

    let mut stream = timeout_at(deadline, TcpStream::connect(upstream_addr))
        .await
        .context("connect timeout")??;
    stream.set_nodelay(true)?;

    let mut frame = Vec::with_capacity(query.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(query);
    timeout_at(deadline, stream.write_all(&frame))
        .await
        .context("write timeout")??;

    let mut len_buf = [0u8; 2];
    timeout_at(deadline, stream.read_exact(&mut len_buf))
        .await
        .context("read timeout")??;

    let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    timeout_at(deadline, stream.read_exact(&mut buf))
        .await
        .context("read timeout")??;

    anyhow::ensure!(
        helpers::extract_transaction_id(&buf) == Some(want_id),
        "transaction id mismatch on TCP response"
    );

    Ok(Bytes::from(buf))
}
