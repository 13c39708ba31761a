use std::{sync::Arc, time::Duration};

use hush_cache::DnsCache;
use hush_rules::RuleStore;
use tokio::time::{self, MissedTickBehavior};

use crate::{
    audit::{AuditHandle, Stats},
    config::SinkholeConfig,
};

/// Global state shared across all requests.
pub struct Global {
    pub cache: DnsCache,
    pub rules: Arc<RuleStore>,
    pub audit: AuditHandle,
    pub sinkhole: SinkholeConfig,
    /// Upper bound on any TTL handed to clients, sinkhole answers included.
    pub max_ttl: u32,
}

impl Global {
    /// Drop expired cache entries every `every`, logging the cache size next to
    /// the live query counters.
    pub async fn cache_maintenance(self: Arc<Self>, stats: Stats, every: Duration) {
        let mut tick = time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tick.tick().await;

            let purged = self.cache.purge_expired();
            let live = stats.live().await;
            tracing::debug!(
                purged,
                entries = self.cache.len(),
                queries = live.total,
                cached = live.cached,
                "cache maintenance"
            );
        }
    }
}
