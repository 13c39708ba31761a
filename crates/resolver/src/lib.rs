use async_trait::async_trait;
use bytes::Bytes;
use hush_context::DnsRequestCtx;
use hush_dns::DnsResponseCode;

pub mod forwarder;

/// Why a query could not be answered. Every variant maps to a response code
/// sent to the client instead of an answer.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("upstream timed out")]
    Timeout,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("{0}")]
    Other(String),
}

impl ResolveError {
    pub fn response_code(&self) -> DnsResponseCode {
        match self {
            ResolveError::InvalidRequest(_) => DnsResponseCode::FormatError,
            _ => DnsResponseCode::ServerFailure,
        }
    }
}

impl From<anyhow::Error> for ResolveError {
    fn from(e: anyhow::Error) -> Self {
        ResolveError::Other(format!("{e:#}"))
    }
}

#[async_trait]
pub trait DnsResolver<G, L>: Send + Sync {
    async fn resolve(&self, ctx: &DnsRequestCtx<G, L>) -> Result<Bytes, ResolveError>;
}

pub type DynResolver<G, L> = dyn DnsResolver<G, L>;
