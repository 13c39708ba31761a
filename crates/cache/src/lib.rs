use std::{sync::Arc, time::Duration};

use hush_dns::{DnsMessage, DnsRecord, DnsRecordData, DnsResponseCode, RecordType, domain_name::DomainName};
use tokio::time::Instant;

mod timed;

pub use timed::{Hit, TimedCache};

/// Cache key: normalized query name plus query type.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub name: DomainName,
    pub record_type: RecordType,
}

impl TryFrom<&DnsMessage> for CacheKey {
    type Error = anyhow::Error;

    fn try_from(message: &DnsMessage) -> Result<Self, Self::Error> {
        let question = message
            .question()
            .ok_or_else(|| anyhow::anyhow!("no question in message"))?;
        Ok(CacheKey {
            name: question.qname.clone(),
            record_type: question.qtype,
        })
    }
}

/// What gets stored for a key: the upstream answer, positive or negative.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedAnswer {
    pub rcode: DnsResponseCode,
    pub answers: Arc<[DnsRecord]>,
    /// SOA for negative answers, empty otherwise.
    pub authority: Arc<[DnsRecord]>,
}

/// A cache hit with TTLs already rewritten to the remaining lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedResponse {
    pub rcode: DnsResponseCode,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
}

#[derive(Clone, Copy, Debug)]
pub struct DnsCacheConfig {
    pub max_entries: usize,
    /// Upper bound on how long any answer is kept, whatever upstream says.
    pub max_ttl: Duration,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_ttl: Duration::from_secs(3600),
        }
    }
}

/// Expiry-aware cache of upstream answers.
///
/// Blocked answers never pass through here; they are synthesized per query.
pub struct DnsCache {
    entries: TimedCache<CacheKey, CachedAnswer>,
    max_ttl: Duration,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(DnsCacheConfig::default())
    }
}

impl DnsCache {
    pub fn new(config: DnsCacheConfig) -> Self {
        Self {
            entries: TimedCache::new(config.max_entries),
            max_ttl: config.max_ttl,
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
        let hit = self.entries.get(key)?;

        let remaining = hit.expires_at.saturating_duration_since(Instant::now());
        let ttl = remaining.min(self.max_ttl).as_secs();
        if ttl == 0 {
            return None;
        }
        let ttl = ttl.min(u32::MAX as u64) as u32;

        let with_ttl = |records: &[DnsRecord]| -> Vec<DnsRecord> {
            records
                .iter()
                .cloned()
                .map(|mut r| {
                    r.ttl = ttl;
                    r
                })
                .collect()
        };

        Some(CachedResponse {
            rcode: hit.value.rcode,
            answers: with_ttl(&hit.value.answers),
            authority: with_ttl(&hit.value.authority),
        })
    }

    /// Store the answer to `query`. Returns whether anything was cached.
    pub fn insert(&self, query: &DnsMessage, response: &DnsMessage) -> bool {
        if response.flags.truncated || !response.flags.response {
            return false;
        }

        let key = match CacheKey::try_from(query) {
            Ok(key) => key,
            Err(_) => return false,
        };

        let rcode = response.response_code();
        let answers: Vec<DnsRecord> = response
            .answers()
            .iter()
            .filter(|r| r.record_type != RecordType::OPT)
            .cloned()
            .collect();

        let (ttl, authority) = match rcode {
            DnsResponseCode::NoError if !answers.is_empty() => {
                let ttl = answers.iter().map(|r| r.ttl()).min().unwrap_or(0);
                (ttl, Vec::new())
            }
            // RFC 2308: negative answers live for min(SOA TTL, SOA MINIMUM).
            DnsResponseCode::NoError | DnsResponseCode::NxDomain => {
                let Some(soa) = response
                    .authority_records()
                    .iter()
                    .find(|r| r.record_type == RecordType::SOA)
                else {
                    return false;
                };
                let DnsRecordData::Soa { minimum, .. } = soa.data else {
                    return false;
                };
                (soa.ttl.min(minimum), vec![soa.clone()])
            }
            _ => return false,
        };

        if ttl == 0 {
            return false;
        }

        let lifetime = Duration::from_secs(ttl as u64).min(self.max_ttl);

        tracing::debug!(name = %key.name, qtype = ?key.record_type, ttl = lifetime.as_secs(), "caching answer");

        self.entries.insert(
            key,
            CachedAnswer {
                rcode,
                answers: answers.into(),
                authority: authority.into(),
            },
            Instant::now() + lifetime,
        );
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        self.entries.purge_expired()
    }
}
