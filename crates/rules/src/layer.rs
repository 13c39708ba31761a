use serde::Deserialize;

use crate::error::LayerError;

/// One policy layer as delivered by the rule-fetch collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleLayer {
    pub block_domains: Vec<String>,
    pub allow_domains: Vec<String>,
    /// External list URLs.
    pub sources: Vec<String>,
    pub allow_only: bool,
}

impl RuleLayer {
    /// Parse a JSON document, rejecting it outright when it lists more than
    /// `max_domains` block and allow entries combined.
    pub fn from_json(body: &str, max_domains: usize) -> Result<Self, LayerError> {
        let layer: RuleLayer = serde_json::from_str(body)?;

        let count = layer.block_domains.len() + layer.allow_domains.len();
        if count > max_domains {
            return Err(LayerError::TooManyDomains { count, max: max_domains });
        }

        Ok(layer)
    }
}
