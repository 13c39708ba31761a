use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use hush_cache::CacheKey;
use hush_context::DnsRequestCtx;
use hush_dns::{DnsMessage, helpers};
use hush_inflight::{Inflight, InflightError};
use rand::Rng;

use super::{request::UpstreamResolveRequest, upstream::Upstreams};
use crate::{DnsResolver, ResolveError};

#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub upstreams: Vec<SocketAddr>,
    /// Upper bound for one attempt against one upstream.
    pub attempt_timeout: Duration,
    /// Record TTLs above this are lowered before the answer is returned.
    pub max_ttl: Duration,
}

/// Resolver that forwards the incoming request to the configured upstreams.
///
/// Identical concurrent queries (same name and type) share one upstream round trip.
pub struct ForwardResolver {
    upstreams: Arc<Upstreams>,
    attempt_timeout: Duration,
    max_ttl: u32,
    inflight_requests: Inflight<CacheKey, Bytes, ResolveError>,
}

impl ForwardResolver {
    pub fn new(config: &ForwardConfig) -> Self {
        if config.upstreams.is_empty() {
            tracing::warn!("No upstreams configured for forward resolver, it will not be able to resolve any queries!");
        }
        Self {
            upstreams: Arc::new(Upstreams::new(&config.upstreams)),
            attempt_timeout: config.attempt_timeout,
            max_ttl: config.max_ttl.as_secs().min(u32::MAX as u64) as u32,
            inflight_requests: Inflight::new(),
        }
    }
}

#[async_trait]
impl<G, L> DnsResolver<G, L> for ForwardResolver
where
    G: Send + Sync + 'static,
    L: Send + Sync,
{
    async fn resolve(&self, ctx: &DnsRequestCtx<G, L>) -> Result<Bytes, ResolveError> {
        let query_message = ctx.message();

        if query_message.questions().len() != 1 {
            return Err(ResolveError::InvalidRequest(format!(
                "request contains {} questions, expected 1",
                query_message.questions().len(),
            )));
        }

        let key = CacheKey::try_from(query_message).map_err(|e| ResolveError::InvalidRequest(e.to_string()))?;

        let upstreams = Arc::clone(&self.upstreams);
        let query = ctx.raw();
        let request_type = ctx.request_type();
        let budget = ctx.budget().clone();
        let attempt_timeout = self.attempt_timeout;

        let shared = self
            .inflight_requests
            .get_or_run(key, move |_| async move {
                let randomized_query = randomize_tid(&query);
                UpstreamResolveRequest::new(request_type, randomized_query, budget, attempt_timeout, upstreams)
                    .resolve()
                    .await
            })
            .await
            .map_err(|e| match e {
                InflightError::Failed(e) => (*e).clone(),
                InflightError::Cancelled => ResolveError::Other("upstream request cancelled".into()),
            })?;

        let mut response = BytesMut::from(&shared[..]);
        helpers::set_transaction_id(&mut response, query_message.id);
        helpers::cap_ttls(&mut response, self.max_ttl).map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
        let response = response.freeze();

        let response_message =
            DnsMessage::decode(&response).map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;

        if response_message.questions() != query_message.questions() {
            return Err(ResolveError::InvalidResponse(
                "upstream response question does not match request question".to_string(),
            ));
        }

        Ok(response)
    }
}

/// Replace the transaction ID with a random one before it leaves the host.
fn randomize_tid(query: &[u8]) -> Bytes {
    let mut bytes = BytesMut::from(query);
    helpers::set_transaction_id(&mut bytes, rand::rng().random::<u16>());
    bytes.freeze()
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
