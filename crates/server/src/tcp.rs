use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use bytes::Bytes;
use hush_context::RequestType;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{ServerState, handler::handle_query};

/// A connection with no new query for this long is closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// First pause after a failed `accept`, doubled per consecutive failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF
        .saturating_mul(1 << failures.saturating_sub(1).min(16))
        .min(MAX_ACCEPT_BACKOFF)
}

/// Run the DNS server over TCP.
pub(crate) async fn run_tcp<G, L>(listener: TcpListener, state: Arc<ServerState<G, L>>) -> anyhow::Result<()>
where
    G: Send + Sync + 'static,
    L: Default + Send + Sync + 'static,
{
    let mut failures = 0u32;
    loop {
        let (stream, client) = match listener.accept().await {
            Ok(c) => {
                failures = 0;
                c
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let pause = accept_backoff(failures);
                tracing::warn!(?pause, "TCP accept error: {e}");
                tokio::time::sleep(pause).await;
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, client, &state).await {
                tracing::debug!(client = %client, "TCP connection closed: {e:#}");
            }
        });
    }
}

/// Answer length-prefixed queries in order until the client goes away or idles out.
async fn serve_connection<G, L>(
    mut stream: TcpStream,
    client: SocketAddr,
    state: &ServerState<G, L>,
) -> anyhow::Result<()>
where
    G: Send + Sync + 'static,
    L: Default + Send + Sync + 'static,
{
    loop {
        let mut len_buf = [0u8; 2];
        match tokio::time::timeout(IDLE_TIMEOUT, stream.read_exact(&mut len_buf)).await {
            Err(_) => return Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(r) => {
                r.context("read length")?;
            }
        }

        let len = u16::from_be_bytes(len_buf) as usize;
        anyhow::ensure!(len > 0, "zero-length frame");

        let mut buf = vec![0; len];
        tokio::time::timeout(IDLE_TIMEOUT, stream.read_exact(&mut buf))
            .await
            .context("read timeout")?
            .context("read body")?;

        let Some(handled) = handle_query(state, RequestType::TCP, client, Bytes::from(buf)).await else {
            anyhow::bail!("malformed query");
        };

        write_tcp_response(&mut stream, &handled.response).await?;
        handled.finish(state).await;
    }
}

/// Write a DNS friendly response to a TCP stream.
async fn write_tcp_response(stream: &mut TcpStream, response: &Bytes) -> anyhow::Result<()> {
    let len = u16::try_from(response.len()).context("DNS payload exceeds 65535 bytes")?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(response).await?;

    Ok(())
}
