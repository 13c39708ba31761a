use std::collections::BTreeSet;

use hush_dns::DomainName;

use crate::{
    error::{LayerError, RuleLoadError},
    layer::RuleLayer,
};

/// The merged policy. Immutable once published to a [`crate::RuleStore`].
///
/// Entries are normalized: lower-case ASCII, no trailing dot, with an optional
/// leading `*.` for strict-subdomain entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    block: BTreeSet<String>,
    allow: BTreeSet<String>,
    external_sources: Vec<String>,
    allow_only: bool,
}

impl RuleSet {
    /// Merge layers in order (base first). Block and allow entries are unioned;
    /// allow precedence is applied at classification time, whatever layer an
    /// entry came from. `allowOnly` in any layer switches the merged set into
    /// allow-only mode and drops external sources.
    pub fn merge<'a>(layers: impl IntoIterator<Item = &'a RuleLayer>) -> Self {
        let mut rules = RuleSet::default();

        for layer in layers {
            rules.allow_only |= layer.allow_only;
            rules.block.extend(layer.block_domains.iter().filter_map(|d| normalize_entry(d)));
            rules.allow.extend(layer.allow_domains.iter().filter_map(|d| normalize_entry(d)));

            for source in &layer.sources {
                let source = source.trim();
                if !source.is_empty() && !rules.external_sources.iter().any(|s| s == source) {
                    rules.external_sources.push(source.to_string());
                }
            }
        }

        if rules.allow_only {
            rules.external_sources.clear();
        }

        rules
    }

    /// Add the domains of an already-fetched external list.
    ///
    /// Ignored unless `source` is one of the merged external sources, so lists
    /// never contribute in allow-only mode.
    pub fn with_external_list<I, S>(mut self, source: &str, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.external_sources.iter().any(|s| s == source) {
            tracing::debug!(source, "ignoring list for unreferenced source");
            return self;
        }

        self.block
            .extend(domains.into_iter().filter_map(|d| normalize_entry(d.as_ref())));
        self
    }

    pub fn block_domains(&self) -> impl Iterator<Item = &str> {
        self.block.iter().map(String::as_str)
    }

    pub fn allow_domains(&self) -> impl Iterator<Item = &str> {
        self.allow.iter().map(String::as_str)
    }

    pub fn block_count(&self) -> usize {
        self.block.len()
    }

    pub fn allow_count(&self) -> usize {
        self.allow.len()
    }

    pub fn external_sources(&self) -> &[String] {
        &self.external_sources
    }

    pub fn allow_only(&self) -> bool {
        self.allow_only
    }
}

/// Normalize a rule entry. Returns `None` for entries that are not valid names.
pub(crate) fn normalize_entry(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (wildcard, name) = match raw.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, raw),
    };

    let name = match DomainName::from_user(name) {
        Ok(name) if !name.is_root() && !name.contains('*') => name,
        _ => {
            tracing::debug!(entry = raw, "skipping invalid rule entry");
            return None;
        }
    };

    Some(if wildcard { format!("*.{name}") } else { name.to_string() })
}

/// A group or user layer that was left out of the merge.
#[derive(Debug)]
pub struct SkippedLayer {
    pub layer: String,
    pub error: LayerError,
}

/// Result of a successful [`load`].
#[derive(Debug)]
pub struct Loaded {
    pub rules: RuleSet,
    pub skipped: Vec<SkippedLayer>,
}

/// Parse and merge the base layer, the group layers and the user override.
///
/// The base layer is mandatory. A malformed group or user layer is logged and
/// skipped; the remaining layers still apply.
pub fn load<'a>(
    base: Option<&str>,
    groups: impl IntoIterator<Item = (&'a str, &'a str)>,
    user: Option<&str>,
    max_domains: usize,
) -> Result<Loaded, RuleLoadError> {
    let base = base.ok_or(RuleLoadError::MissingBase)?;
    let base = RuleLayer::from_json(base, max_domains).map_err(RuleLoadError::InvalidBase)?;

    let mut layers = vec![base];
    let mut skipped = Vec::new();

    let optional = groups
        .into_iter()
        .map(|(name, body)| (name.to_string(), body))
        .chain(user.map(|body| ("user".to_string(), body)));

    for (name, body) in optional {
        match RuleLayer::from_json(body, max_domains) {
            Ok(layer) => layers.push(layer),
            Err(error) => {
                tracing::warn!(layer = %name, "skipping rule layer: {}", error);
                skipped.push(SkippedLayer { layer: name, error });
            }
        }
    }

    Ok(Loaded {
        rules: RuleSet::merge(&layers),
        skipped,
    })
}

#[cfg(test)]
#[path = "ruleset_tests.rs"]
mod ruleset_tests;
