use std::{fmt, time::Duration};

use hush_dns::DomainName;
use parking_lot::Mutex;
use rand::Rng;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, PKCS_ECDSA_P256_SHA256, PublicKeyData, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::OffsetDateTime;

use crate::{
    domain::validate_domain,
    error::{CaInitError, IssueError},
    limiter::{RateLimiter, RateLimits},
    store::CaStore,
};

pub const ROOT_CERT_NAME: &str = "root.crt";
pub const ROOT_KEY_NAME: &str = "root.key";

#[derive(Debug, Clone)]
pub struct CaConfig {
    pub common_name: String,
    pub root_validity: Duration,
    pub leaf_validity: Duration,
    /// Subtracted from `NotBefore` to tolerate client clocks running behind.
    pub clock_skew: Duration,
    pub limits: RateLimits,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            common_name: "hush local root".to_string(),
            root_validity: Duration::from_secs(10 * 365 * 24 * 3600),
            leaf_validity: Duration::from_secs(15 * 60),
            clock_skew: Duration::from_secs(120),
            limits: RateLimits::default(),
        }
    }
}

/// PKCS#8 DER of a leaf private key.
pub struct LeafKey(Vec<u8>);

impl LeafKey {
    pub fn to_private_key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.0.clone()))
    }
}

impl fmt::Debug for LeafKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LeafKey(<redacted>)")
    }
}

/// An issued leaf certificate and its key.
#[derive(Debug)]
pub struct LeafCert {
    pub domain: DomainName,
    pub cert: CertificateDer<'static>,
    pub key: LeafKey,
    pub serial: u64,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl LeafCert {
    /// Time left before `expires_at`, zero once passed.
    pub fn remaining(&self) -> Duration {
        (self.expires_at - OffsetDateTime::now_utc()).try_into().unwrap_or(Duration::ZERO)
    }

    pub fn serial_hex(&self) -> String {
        format!("{:016x}", self.serial)
    }
}

/// Anything that can mint a leaf for a domain.
pub trait LeafIssuer: Send + Sync + 'static {
    fn issue_leaf(&self, domain: &str) -> Result<LeafCert, IssueError>;
}

struct Signer {
    issuer: Issuer<'static, KeyPair>,
    next_serial: u64,
}

/// Owns the root key and signs leaves with it.
pub struct CertificateAuthority {
    signer: Mutex<Signer>,
    root_cert: CertificateDer<'static>,
    root_pem: String,
    limiter: RateLimiter,
    config: CaConfig,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("common_name", &self.config.common_name)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load the root from `store`, or generate and persist a new one when it is
    /// missing, expired, not a CA, or does not match its key.
    pub fn load_or_create(store: &dyn CaStore, config: CaConfig) -> Result<Self, CaInitError> {
        let (issuer, root_pem) = match load_root(store, &config)? {
            Some(loaded) => {
                tracing::info!("loaded root certificate");
                loaded
            }
            None => {
                let created = create_root(store, &config)?;
                tracing::info!(common_name = %config.common_name, "generated new root certificate");
                created
            }
        };

        let root_cert = first_cert(&root_pem)
            .ok_or_else(|| CaInitError::Generate("root certificate is not valid PEM".into()))?;

        // Random start, then strictly increasing. Kept below 2^63 so the DER
        // integer stays positive in eight bytes.
        let next_serial = rand::rng().random_range(1u64..(1u64 << 62));

        Ok(Self {
            signer: Mutex::new(Signer { issuer, next_serial }),
            root_cert,
            root_pem,
            limiter: RateLimiter::new(config.limits),
            config,
        })
    }

    pub fn root_cert(&self) -> &CertificateDer<'static> {
        &self.root_cert
    }

    /// Root certificate PEM, for installation into a trust store.
    pub fn root_pem(&self) -> &str {
        &self.root_pem
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }
}

impl LeafIssuer for CertificateAuthority {
    fn issue_leaf(&self, domain: &str) -> Result<LeafCert, IssueError> {
        let domain = validate_domain(domain)?;
        self.limiter.try_acquire(&domain)?;

        let now = OffsetDateTime::now_utc();
        let expires_at = now + self.config.leaf_validity;

        let mut params = CertificateParams::new(vec![domain.to_string()]).map_err(signing)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, domain.as_str());
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = now - self.config.clock_skew;
        params.not_after = expires_at;
        params.use_authority_key_identifier_extension = true;

        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(signing)?;

        let (cert, serial) = {
            let mut signer = self.signer.lock();
            let serial = signer.next_serial;
            params.serial_number = Some(SerialNumber::from(serial));
            let cert = params.signed_by(&key, &signer.issuer).map_err(signing)?;
            signer.next_serial += 1;
            (cert, serial)
        };

        tracing::debug!(domain = %domain, serial, "issued leaf certificate");

        Ok(LeafCert {
            domain,
            cert: cert.der().clone(),
            key: LeafKey(key.serialize_der()),
            serial,
            issued_at: now,
            expires_at,
        })
    }
}

fn signing(e: rcgen::Error) -> IssueError {
    IssueError::Signing(e.to_string())
}

fn first_cert(pem: &str) -> Option<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut pem.as_bytes()).next()?.ok()
}

fn load_root(store: &dyn CaStore, config: &CaConfig) -> Result<Option<(Issuer<'static, KeyPair>, String)>, CaInitError> {
    let (Some(cert), Some(key)) = (store.load(ROOT_CERT_NAME)?, store.load(ROOT_KEY_NAME)?) else {
        return Ok(None);
    };

    let (Ok(cert_pem), Ok(key_pem)) = (String::from_utf8(cert), String::from_utf8(key)) else {
        tracing::warn!("stored root is not UTF-8 PEM, regenerating");
        return Ok(None);
    };

    match check_root(&cert_pem, &key_pem, config) {
        Ok(issuer) => Ok(Some((issuer, cert_pem))),
        Err(reason) => {
            tracing::warn!("stored root unusable ({}), regenerating", reason);
            Ok(None)
        }
    }
}

fn check_root(cert_pem: &str, key_pem: &str, config: &CaConfig) -> Result<Issuer<'static, KeyPair>, String> {
    let params = CertificateParams::from_ca_cert_pem(cert_pem).map_err(|e| e.to_string())?;

    if !matches!(params.is_ca, IsCa::Ca(_)) {
        return Err("not a CA certificate".into());
    }
    if !params.key_usages.contains(&KeyUsagePurpose::KeyCertSign) {
        return Err("missing keyCertSign usage".into());
    }
    // The root has to outlive every leaf signed with it.
    if params.not_after <= OffsetDateTime::now_utc() + config.leaf_validity {
        return Err("expired".into());
    }

    let key = KeyPair::from_pem(key_pem).map_err(|_| "unreadable key".to_string())?;
    let der = first_cert(cert_pem).ok_or("unreadable certificate")?;
    let public = key.der_bytes();
    if !der.as_ref().windows(public.len()).any(|w| w == public) {
        return Err("key does not match certificate".into());
    }

    Issuer::from_ca_cert_pem(cert_pem, key).map_err(|e| e.to_string())
}

fn create_root(store: &dyn CaStore, config: &CaConfig) -> Result<(Issuer<'static, KeyPair>, String), CaInitError> {
    let generate = |e: rcgen::Error| CaInitError::Generate(e.to_string());

    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).map_err(generate)?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, config.common_name.as_str());
    dn.push(DnType::OrganizationName, "hush");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - config.clock_skew;
    params.not_after = now + config.root_validity;
    params.serial_number = Some(SerialNumber::from(rand::rng().random_range(1u64..(1u64 << 62))));

    let cert = params.self_signed(&key).map_err(generate)?;
    let cert_pem = cert.pem();

    store.store(ROOT_KEY_NAME, key.serialize_pem().as_bytes())?;
    store.store(ROOT_CERT_NAME, cert_pem.as_bytes())?;

    Ok((Issuer::new(params, key), cert_pem))
}

#[cfg(test)]
#[path = "authority_tests.rs"]
mod authority_tests;
