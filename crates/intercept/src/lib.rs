//! HTTPS listener for sinkholed domains.
//!
//! Each connection's SNI is re-checked against the active rules. Blocked names get a
//! freshly issued leaf and the block page; anything else gets a TLS alert.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use hush_audit::{AuditEvent, AuditSink, DenyReason, Surface};
use hush_ca::{CertCache, IssueError};
use hush_rules::RuleStore;
use hyper::{Request, body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use rustls::{ServerConfig, pki_types::CertificateDer, server::Acceptor};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{Instant, timeout, timeout_at},
};
use tokio_rustls::LazyConfigAcceptor;

pub mod page;
mod tls;

/// First pause after a failed `accept`, doubled per consecutive failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF
        .saturating_mul(1 << failures.saturating_sub(1).min(16))
        .min(MAX_ACCEPT_BACKOFF)
}

#[derive(Debug, Clone, Copy)]
pub struct InterceptConfig {
    /// Limit for reading the ClientHello and completing the handshake.
    pub handshake_timeout: Duration,
    /// Limit for receiving the request and writing the block page.
    pub request_timeout: Duration,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

struct Shared {
    rules: Arc<RuleStore>,
    certs: Arc<CertCache>,
    root: CertificateDer<'static>,
    deny: Arc<ServerConfig>,
    audit: Arc<dyn AuditSink>,
    config: InterceptConfig,
}

pub struct InterceptServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl InterceptServer {
    pub async fn bind(
        addr: SocketAddr,
        rules: Arc<RuleStore>,
        certs: Arc<CertCache>,
        root: CertificateDer<'static>,
        audit: Arc<dyn AuditSink>,
        config: InterceptConfig,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let shared = Arc::new(Shared {
            rules,
            certs,
            root,
            deny: tls::deny_config()?,
            audit,
            config,
        });

        Ok(Self { listener, shared })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Intercept listening on {}", self.local_addr()?);

        let mut failures = 0u32;
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(c) => {
                    failures = 0;
                    c
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_backoff(failures);
                    tracing::warn!(?pause, "intercept accept error: {e}");
                    tokio::time::sleep(pause).await;
                    continue;
                }
            };

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = shared.handle(stream).await {
                    tracing::debug!(peer = %peer, "intercept connection ended: {e:#}");
                }
            });
        }
    }
}

impl Shared {
    async fn handle(&self, stream: TcpStream) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.config.handshake_timeout;

        let start = timeout_at(deadline, LazyConfigAcceptor::new(Acceptor::default(), stream)).await??;

        let Some(sni) = start.client_hello().server_name().map(str::to_ascii_lowercase) else {
            anyhow::bail!("ClientHello without SNI");
        };

        let config = match self.select_config(&sni).await {
            Some(config) => config,
            None => {
                // Drive the handshake so the client receives the alert.
                let _ = timeout_at(deadline, start.into_stream(self.deny.clone())).await;
                return Ok(());
            }
        };

        let tls = timeout_at(deadline, start.into_stream(config)).await??;

        self.audit.emit(AuditEvent::Blocked {
            domain: sni.clone(),
            surface: Surface::Intercept,
            qtype: None,
            client: None,
        });

        let svc = service_fn(move |_req: Request<Incoming>| {
            let sni = sni.clone();
            async move { page::response(&sni) }
        });

        timeout(
            self.config.request_timeout,
            http1::Builder::new()
                .keep_alive(false)
                .serve_connection(TokioIo::new(tls), svc),
        )
        .await??;

        Ok(())
    }

    /// The config to finish the handshake with, or `None` to refuse it.
    async fn select_config(&self, sni: &str) -> Option<Arc<ServerConfig>> {
        if !self.rules.is_blocked(sni) {
            tracing::warn!(sni = %sni, "refusing interception for domain that is not blocked");
            self.deny(sni, DenyReason::NotBlocked);
            return None;
        }

        let leaf = match self.certs.get_or_issue(sni).await {
            Ok(leaf) => leaf,
            Err(e) => {
                tracing::warn!(sni = %sni, "certificate unavailable: {e}");
                self.deny(sni, deny_reason(&e));
                return None;
            }
        };

        match tls::leaf_config(&leaf, &self.root) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::error!(sni = %sni, "failed to build TLS config: {e:#}");
                self.deny(sni, DenyReason::Signing);
                None
            }
        }
    }

    fn deny(&self, sni: &str, reason: DenyReason) {
        self.audit.emit(AuditEvent::CertDenied {
            domain: sni.to_string(),
            reason,
        });
    }
}

fn deny_reason(e: &IssueError) -> DenyReason {
    match e {
        IssueError::RateLimited(_) => DenyReason::RateLimited,
        IssueError::InvalidDomain => DenyReason::InvalidDomain,
        IssueError::Signing(_) => DenyReason::Signing,
        IssueError::Timeout | IssueError::Cancelled => DenyReason::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), ACCEPT_BACKOFF);
        assert_eq!(accept_backoff(3), Duration::from_millis(40));
        assert_eq!(accept_backoff(7), Duration::from_millis(640));
        assert_eq!(accept_backoff(20), MAX_ACCEPT_BACKOFF);
    }
}
