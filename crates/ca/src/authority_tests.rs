use std::sync::Arc;

use tempfile::TempDir;

use super::*;
use crate::{
    error::LimitScope,
    store::{FileStore, MemoryStore},
};

fn config() -> CaConfig {
    CaConfig {
        limits: RateLimits {
            per_domain: 3,
            global: 100,
            window: Duration::from_secs(60),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_persists_and_reloads() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("ca"));

    let first = CertificateAuthority::load_or_create(&store, config()).unwrap();
    assert!(store.path(ROOT_CERT_NAME).exists());
    assert!(store.path(ROOT_KEY_NAME).exists());

    let second = CertificateAuthority::load_or_create(&store, config()).unwrap();
    assert_eq!(first.root_pem(), second.root_pem());
    assert_eq!(first.root_cert(), second.root_cert());
}

#[tokio::test]
async fn test_root_is_a_ca() {
    let ca = CertificateAuthority::load_or_create(&MemoryStore::new(), config()).unwrap();

    let params = CertificateParams::from_ca_cert_pem(ca.root_pem()).unwrap();
    assert!(matches!(params.is_ca, IsCa::Ca(_)));
    assert!(params.key_usages.contains(&KeyUsagePurpose::KeyCertSign));
    assert!(params.not_after > OffsetDateTime::now_utc() + Duration::from_secs(365 * 24 * 3600));
}

#[tokio::test]
async fn test_mismatched_key_regenerates() {
    let store = MemoryStore::new();
    let original = CertificateAuthority::load_or_create(&store, config()).unwrap();

    let stranger = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    store.store(ROOT_KEY_NAME, stranger.serialize_pem().as_bytes()).unwrap();

    let reloaded = CertificateAuthority::load_or_create(&store, config()).unwrap();
    assert_ne!(original.root_pem(), reloaded.root_pem());
}

#[tokio::test]
async fn test_garbage_root_regenerates() {
    let store = MemoryStore::new();
    store.store(ROOT_CERT_NAME, b"not a certificate").unwrap();
    store.store(ROOT_KEY_NAME, b"not a key").unwrap();

    let ca = CertificateAuthority::load_or_create(&store, config()).unwrap();
    let stored = store.load(ROOT_CERT_NAME).unwrap().unwrap();
    assert_eq!(stored, ca.root_pem().as_bytes());
}

#[tokio::test]
async fn test_unwritable_store_fails() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();

    let store = FileStore::new(blocker.join("ca"));
    let err = CertificateAuthority::load_or_create(&store, config()).unwrap_err();
    assert!(matches!(err, CaInitError::Store(_)));
}

#[tokio::test]
async fn test_issue_leaf() {
    let ca = CertificateAuthority::load_or_create(&MemoryStore::new(), config()).unwrap();

    let leaf = ca.issue_leaf("Blocked.Example.com").unwrap();
    assert_eq!(leaf.domain.as_str(), "blocked.example.com");
    assert!(leaf.expires_at > leaf.issued_at);
    assert!(leaf.remaining() <= ca.config().leaf_validity);

    let params = CertificateParams::from_ca_cert_der(&leaf.cert).unwrap();
    assert!(format!("{:?}", params.subject_alt_names).contains("blocked.example.com"));
    assert!(!matches!(params.is_ca, IsCa::Ca(_)));
    assert!(params.not_before < leaf.issued_at);
    assert_eq!(params.serial_number, Some(SerialNumber::from(leaf.serial)));

    assert_eq!(format!("{:?}", leaf.key), "LeafKey(<redacted>)");
    assert!(!format!("{ca:?}").contains("PRIVATE"));
}

#[tokio::test]
async fn test_serials_strictly_increase() {
    let ca = Arc::new(CertificateAuthority::load_or_create(&MemoryStore::new(), CaConfig::default()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ca = Arc::clone(&ca);
            std::thread::spawn(move || ca.issue_leaf(&format!("host{i}.example.com")).unwrap().serial)
        })
        .collect();

    let mut serials: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    serials.sort_unstable();
    serials.dedup();
    assert_eq!(serials.len(), 8);
    assert_eq!(serials[7] - serials[0], 7);
}

#[tokio::test]
async fn test_rejects_invalid_domain_before_signing() {
    let ca = CertificateAuthority::load_or_create(&MemoryStore::new(), config()).unwrap();

    for _ in 0..10 {
        assert_eq!(ca.issue_leaf("127.0.0.1").unwrap_err(), IssueError::InvalidDomain);
    }
    // Rejected requests consume no issuance budget.
    assert!(ca.issue_leaf("ok.example.com").is_ok());
}

#[tokio::test]
async fn test_rate_limited() {
    let ca = CertificateAuthority::load_or_create(&MemoryStore::new(), config()).unwrap();

    for _ in 0..3 {
        ca.issue_leaf("busy.example.com").unwrap();
    }
    assert_eq!(
        ca.issue_leaf("busy.example.com").unwrap_err(),
        IssueError::RateLimited(LimitScope::Domain)
    );
}
