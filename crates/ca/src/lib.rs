//! Local certificate authority: root key management, leaf issuance, issuance
//! rate limiting and the leaf certificate cache.
//!
//! Root and leaf private keys stay inside this crate as opaque values with
//! redacted `Debug`. They are not zeroed on drop; copies may linger in freed
//! memory until it is reused.

mod authority;
mod cache;
mod domain;
mod error;
mod limiter;
mod store;

pub use authority::{CaConfig, CertificateAuthority, LeafCert, LeafIssuer, LeafKey, ROOT_CERT_NAME, ROOT_KEY_NAME};
pub use cache::{CertCache, CertCacheConfig};
pub use domain::validate_domain;
pub use error::{CaInitError, IssueError, LimitScope, StoreError};
pub use limiter::{RateLimiter, RateLimits};
pub use store::{CaStore, FileStore, MemoryStore};
