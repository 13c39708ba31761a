use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The CA could neither load nor create its root. Fatal at startup.
#[derive(Debug, Error)]
pub enum CaInitError {
    #[error("ca storage: {0}")]
    Store(#[from] StoreError),
    #[error("failed to generate root certificate: {0}")]
    Generate(String),
}

/// Which ceiling a refused issuance hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope {
    Domain,
    Global,
}

/// Leaf issuance failed. Cheap to clone so a single-flight failure can be
/// handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("issuance rate limit reached ({0:?})")]
    RateLimited(LimitScope),
    #[error("refusing to issue for invalid domain")]
    InvalidDomain,
    #[error("failed to sign leaf certificate: {0}")]
    Signing(String),
    #[error("leaf issuance timed out")]
    Timeout,
    #[error("leaf issuance cancelled")]
    Cancelled,
}
