use std::{sync::Arc, time::Duration};

use hush_audit::{AuditEvent, AuditSink};
use hush_cache::TimedCache;
use hush_dns::DomainName;
use hush_inflight::{Inflight, InflightError};
use tokio::time::Instant;

use crate::{
    authority::{LeafCert, LeafIssuer},
    domain::validate_domain,
    error::IssueError,
};

#[derive(Debug, Clone, Copy)]
pub struct CertCacheConfig {
    pub max_entries: usize,
    /// Deadline for a single issuance, including time spent waiting for a
    /// blocking thread.
    pub issue_timeout: Duration,
    /// Entries are dropped this long before the certificate expires.
    pub renew_before: Duration,
}

impl Default for CertCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            issue_timeout: Duration::from_secs(5),
            renew_before: Duration::from_secs(30),
        }
    }
}

/// Domain to leaf certificate, with single-flight issuance on miss.
pub struct CertCache {
    entries: TimedCache<DomainName, Arc<LeafCert>>,
    inflight: Inflight<DomainName, Arc<LeafCert>, IssueError>,
    issuer: Arc<dyn LeafIssuer>,
    audit: Arc<dyn AuditSink>,
    config: CertCacheConfig,
}

impl CertCache {
    pub fn new(issuer: Arc<dyn LeafIssuer>, audit: Arc<dyn AuditSink>, config: CertCacheConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: TimedCache::new(config.max_entries),
            inflight: Inflight::new(),
            issuer,
            audit,
            config,
        })
    }

    /// Return the cached leaf for `domain`, issuing one if there is none.
    ///
    /// Concurrent callers for the same domain share one issuance and its result.
    pub async fn get_or_issue(self: &Arc<Self>, domain: &str) -> Result<Arc<LeafCert>, IssueError> {
        let domain = validate_domain(domain)?;

        if let Some(hit) = self.entries.get(&domain) {
            return Ok(hit.value);
        }

        let this = Arc::clone(self);
        let key = domain.clone();
        let outcome = self
            .inflight
            .get_or_run(domain, move |_token| async move { this.issue(key).await })
            .await;

        match outcome {
            Ok(leaf) => Ok(Arc::clone(&*leaf)),
            Err(InflightError::Failed(e)) => Err((*e).clone()),
            Err(InflightError::Cancelled) => Err(IssueError::Cancelled),
        }
    }

    async fn issue(self: Arc<Self>, domain: DomainName) -> Result<Arc<LeafCert>, IssueError> {
        // A previous flight may have filled the entry while this one was queued.
        if let Some(hit) = self.entries.get(&domain) {
            return Ok(hit.value);
        }

        let issuer = Arc::clone(&self.issuer);
        let name = domain.clone();
        let job = tokio::task::spawn_blocking(move || issuer.issue_leaf(name.as_str()));

        let leaf = match tokio::time::timeout(self.config.issue_timeout, job).await {
            Ok(Ok(result)) => Arc::new(result?),
            Ok(Err(join)) => return Err(IssueError::Signing(join.to_string())),
            Err(_) => {
                tracing::warn!(domain = %domain, "leaf issuance timed out");
                return Err(IssueError::Timeout);
            }
        };

        self.audit.emit(AuditEvent::CertIssued {
            domain: domain.to_string(),
            serial: leaf.serial_hex(),
            not_after: leaf.expires_at.unix_timestamp(),
        });

        let lifetime = leaf.remaining().saturating_sub(self.config.renew_before);
        if !lifetime.is_zero() {
            self.entries.insert(domain, Arc::clone(&leaf), Instant::now() + lifetime);
        }

        Ok(leaf)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
