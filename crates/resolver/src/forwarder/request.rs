use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use hush_context::{RequestBudget, RequestType};
use hush_dns::helpers;

use super::{tcp, udp::UdpConn, upstream::Upstreams};
use crate::ResolveError;

/// Minimum amount of time needed to start a new attempt.
const MIN_REMAINING_TO_START_ATTEMPT: Duration = Duration::from_millis(15);

pub struct UpstreamResolveRequest {
    request_type: RequestType,
    query: Bytes,
    request_budget: RequestBudget,
    attempt_timeout: Duration,
    upstreams: Arc<Upstreams>,
}

impl UpstreamResolveRequest {
    pub fn new(
        request_type: RequestType,
        query: Bytes,
        request_budget: RequestBudget,
        attempt_timeout: Duration,
        upstreams: Arc<Upstreams>,
    ) -> Self {
        Self {
            request_type,
            query,
            request_budget,
            attempt_timeout,
            upstreams,
        }
    }

    /// Forward the query, moving on to the next upstream after a failure until
    /// every upstream has been tried or the budget runs out.
    pub async fn resolve(&self) -> Result<Bytes, ResolveError> {
        if self.upstreams.is_empty() {
            return Err(ResolveError::Upstream("no upstreams configured".into()));
        }

        let mut timed_out = false;

        for upstream in self.upstreams.rotation() {
            match self.request_budget.remaining() {
                Some(r) if r >= MIN_REMAINING_TO_START_ATTEMPT => {}
                _ => return Err(ResolveError::Timeout),
            }

            let deadline = self.request_budget.cap(self.attempt_timeout);

            let attempt = match self.request_type {
                RequestType::TCP => tcp::exchange(upstream, &self.query, deadline).await,
                RequestType::UDP => match self.resolve_udp(upstream, deadline).await {
                    // Retry this upstream over TCP before moving on.
                    Ok(resp) if helpers::is_truncated(&resp) == Some(true) => {
                        tracing::debug!(upstream = %upstream, "truncated answer, retrying over TCP");
                        tcp::exchange(upstream, &self.query, self.request_budget.cap(self.attempt_timeout)).await
                    }
                    other => other,
                },
            };

            match attempt {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    timed_out |= e.is::<tokio::time::error::Elapsed>();
                    tracing::warn!(
                        upstream = %upstream,
                        req_type = ?self.request_type,
                        error = %e,
                        "forward attempt failed"
                    );
                }
            }
        }

        if timed_out {
            Err(ResolveError::Timeout)
        } else {
            Err(ResolveError::Upstream("all upstreams failed".into()))
        }
    }

    async fn resolve_udp(
        &self,
        upstream: std::net::SocketAddr,
        deadline: tokio::time::Instant,
    ) -> anyhow::Result<Bytes> {
        let connection = UdpConn::new(upstream).await?;
        connection.send_and_receive(&self.query, deadline).await
    }
}
