use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use hush_context::{DnsMiddleware, DnsRequestCtx};
use hush_resolver::{DynResolver, ResolveError};
use tokio::net::{TcpListener, UdpSocket};

mod handler;
mod tcp;
mod udp;

pub type SuccessCallback<G, L> =
    Arc<dyn for<'a> Fn(&'a DnsRequestCtx<G, L>, &'a bytes::Bytes) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

pub type ErrorCallback<G, L> = Arc<
    dyn for<'a> Fn(&'a DnsRequestCtx<G, L>, &'a ResolveError) -> BoxFuture<'a, Result<(), ResolveError>> + Send + Sync,
>;

pub type ServerMiddlewares<G, L> = Arc<Vec<Arc<dyn DnsMiddleware<G, L> + 'static>>>;

pub struct ServerState<G, L> {
    pub resolver: Arc<DynResolver<G, L>>,
    pub middlewares: ServerMiddlewares<G, L>,
    pub on_success: Option<SuccessCallback<G, L>>,
    pub on_error: Option<ErrorCallback<G, L>>,
    pub global: Arc<G>,
    /// Total time allowed to answer one query.
    pub timeout: Duration,
}

/// DNS server answering on UDP and TCP at the same address.
pub struct DnsServer<G, L> {
    udp: UdpSocket,
    tcp: TcpListener,
    state: Arc<ServerState<G, L>>,
}

impl<G, L> DnsServer<G, L>
where
    G: Send + Sync + 'static,
    L: Default + Send + Sync + 'static,
{
    /// Bind both listeners. Binding port 0 picks one free port for UDP and reuses it for TCP.
    pub async fn bind(bind_addr: SocketAddr, state: ServerState<G, L>) -> anyhow::Result<Self> {
        let udp = UdpSocket::bind(bind_addr).await?;
        let tcp = TcpListener::bind(udp.local_addr()?).await?;

        Ok(Self {
            udp,
            tcp,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Serve until either listener fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("DNS listening on {} (udp+tcp)", addr);

        tokio::try_join!(
            udp::run_udp(self.udp, Arc::clone(&self.state)),
            tcp::run_tcp(self.tcp, Arc::clone(&self.state)),
        )?;

        Ok(())
    }
}
