use async_trait::async_trait;
use bytes::Bytes;
use hush_cache::CacheKey;
use hush_context::{DnsMiddleware, DnsRequestCtx};
use hush_dns::DnsMessageBuilder;

use crate::{global::Global, local::Local};

/// Caching middleware that serves responses from cache if available.
pub struct CacheMiddleware;

#[async_trait]
impl DnsMiddleware<Global, Local> for CacheMiddleware {
    async fn on_query(&self, ctx: &DnsRequestCtx<Global, Local>) -> anyhow::Result<Option<Bytes>> {
        let message = ctx.message();

        let cache_key = CacheKey::try_from(message)?;
        let Some(cached) = ctx.global().cache.lookup(&cache_key) else {
            return Ok(None);
        };

        tracing::debug!("cache hit for {:?} ({:?})", cache_key, cached.rcode);
        ctx.local_mut().cache_hit = true;

        let bytes = DnsMessageBuilder::response_to(message)
            .with_answers(cached.answers)
            .with_authority_records(cached.authority)
            .with_response(cached.rcode)
            .build()
            .encode()?;

        Ok(Some(bytes))
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
