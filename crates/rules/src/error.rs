use thiserror::Error;

/// A single rule document could not be used.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("malformed rule document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("rule document lists {count} domains, more than the limit of {max}")]
    TooManyDomains { count: usize, max: usize },
}

/// The merged policy could not be built. The previously active rules keep serving.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("base rule layer is missing")]
    MissingBase,
    #[error("base rule layer is invalid: {0}")]
    InvalidBase(#[source] LayerError),
}

/// A name that cannot be classified. Never surfaced past the index: such names
/// classify as unknown.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("malformed domain name")]
    Malformed,
    #[error("single-label name")]
    SingleLabel,
}
