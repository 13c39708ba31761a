use std::sync::atomic::{AtomicUsize, Ordering};

use hush_audit::MemorySink;

use super::*;
use crate::{
    authority::{CaConfig, CertificateAuthority},
    error::LimitScope,
    limiter::RateLimits,
    store::MemoryStore,
};

/// Counts calls and optionally stalls before delegating.
struct CountingIssuer {
    inner: CertificateAuthority,
    calls: AtomicUsize,
    delay: Duration,
}

impl LeafIssuer for CountingIssuer {
    fn issue_leaf(&self, domain: &str) -> Result<LeafCert, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.inner.issue_leaf(domain)
    }
}

fn issuer(leaf_validity: Duration, per_domain: usize, delay: Duration) -> Arc<CountingIssuer> {
    let config = CaConfig {
        leaf_validity,
        limits: RateLimits {
            per_domain,
            global: 1000,
            window: Duration::from_secs(60),
        },
        ..Default::default()
    };
    Arc::new(CountingIssuer {
        inner: CertificateAuthority::load_or_create(&MemoryStore::new(), config).unwrap(),
        calls: AtomicUsize::new(0),
        delay,
    })
}

fn cache(issuer: Arc<CountingIssuer>, audit: Arc<MemorySink>, config: CertCacheConfig) -> Arc<CertCache> {
    CertCache::new(issuer, audit, config)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_issue_once() {
    let issuer = issuer(Duration::from_secs(600), 10, Duration::from_millis(100));
    let audit = Arc::new(MemorySink::new());
    let cache = cache(Arc::clone(&issuer), Arc::clone(&audit), CertCacheConfig::default());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_issue("new.example.com").await })
        })
        .collect();

    let mut serials = Vec::new();
    for handle in handles {
        serials.push(handle.await.unwrap().unwrap().serial);
    }

    assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    assert!(serials.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(audit.count("cert_issued"), 1);
}

#[tokio::test]
async fn test_reuse_then_reissue_after_expiry() {
    let issuer = issuer(Duration::from_secs(2), 10, Duration::ZERO);
    let cache = cache(
        Arc::clone(&issuer),
        Arc::new(MemorySink::new()),
        CertCacheConfig {
            renew_before: Duration::from_millis(1500),
            ..Default::default()
        },
    );

    let first = cache.get_or_issue("blocked.example.com").await.unwrap();
    let second = cache.get_or_issue("BLOCKED.example.com.").await.unwrap();
    assert_eq!(first.cert, second.cert);
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(700)).await;

    let third = cache.get_or_issue("blocked.example.com").await.unwrap();
    assert_ne!(third.serial, first.serial);
    assert_ne!(third.cert, first.cert);
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_shared_by_waiters() {
    let issuer = issuer(Duration::from_secs(600), 0, Duration::from_millis(100));
    let cache = cache(Arc::clone(&issuer), Arc::new(MemorySink::new()), CertCacheConfig::default());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_issue("limited.example.com").await })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.await.unwrap().unwrap_err(),
            IssueError::RateLimited(LimitScope::Domain)
        );
    }
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_rate_limit_on_reissue() {
    let issuer = issuer(Duration::from_secs(2), 1, Duration::ZERO);
    let cache = cache(
        Arc::clone(&issuer),
        Arc::new(MemorySink::new()),
        CertCacheConfig {
            renew_before: Duration::from_millis(1900),
            ..Default::default()
        },
    );

    cache.get_or_issue("blocked.example.com").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        cache.get_or_issue("blocked.example.com").await.unwrap_err(),
        IssueError::RateLimited(LimitScope::Domain)
    );
}

#[tokio::test]
async fn test_issue_timeout() {
    let issuer = issuer(Duration::from_secs(600), 10, Duration::from_millis(500));
    let cache = cache(
        issuer,
        Arc::new(MemorySink::new()),
        CertCacheConfig {
            issue_timeout: Duration::from_millis(50),
            ..Default::default()
        },
    );

    assert_eq!(cache.get_or_issue("slow.example.com").await.unwrap_err(), IssueError::Timeout);
}

#[tokio::test]
async fn test_invalid_domain_never_reaches_issuer() {
    let issuer = issuer(Duration::from_secs(600), 10, Duration::ZERO);
    let cache = cache(Arc::clone(&issuer), Arc::new(MemorySink::new()), CertCacheConfig::default());

    for bad in ["", "localhost", "10.0.0.1", "a b.com", "*.*.example.com"] {
        assert_eq!(cache.get_or_issue(bad).await.unwrap_err(), IssueError::InvalidDomain);
    }
    assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
}
