use hush_dns::{DomainName, domain_name::MAX_NAME_LEN};

use crate::{error::ClassifyError, ruleset::RuleSet};

/// Outcome of looking a name up in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Blocked,
    Allowed,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default)]
struct Marks {
    /// The name itself and everything below it.
    subtree: bool,
    /// Strict subdomains only (`*.name`).
    wildcard: bool,
}

/// Node in the label-reversed trie.
#[derive(Debug, Clone, Default)]
struct Node {
    label: Box<str>,
    block: Marks,
    allow: Marks,
    children: Vec<Node>,
}

impl Node {
    fn new(label: &str) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    fn child(&self, label: &str) -> Option<&Node> {
        self.children
            .binary_search_by(|n| n.label.as_ref().cmp(label))
            .ok()
            .map(|i| &self.children[i])
    }

    fn child_mut(&mut self, label: &str) -> &mut Node {
        match self.children.binary_search_by(|n| n.label.as_ref().cmp(label)) {
            Ok(i) => &mut self.children[i],
            Err(i) => {
                self.children.insert(i, Node::new(label));
                &mut self.children[i]
            }
        }
    }
}

/// Immutable domain index built from one [`RuleSet`].
///
/// Lookups walk labels from the TLD inward, so a classification costs one
/// binary search per label.
#[derive(Debug, Clone, Default)]
pub struct BlocklistIndex {
    root: Node,
    allow_only: bool,
}

enum Kind {
    Block,
    Allow,
}

impl BlocklistIndex {
    pub fn build(rules: &RuleSet) -> Self {
        let mut root = Node::default();

        for entry in rules.block_domains() {
            insert(&mut root, entry, Kind::Block);
        }
        for entry in rules.allow_domains() {
            insert(&mut root, entry, Kind::Allow);
        }

        Self {
            root,
            allow_only: rules.allow_only(),
        }
    }

    pub fn allow_only(&self) -> bool {
        self.allow_only
    }

    /// Classify a query name.
    ///
    /// Any allow entry covering the name wins. Otherwise a covering block entry
    /// yields `Blocked`. In allow-only mode every well-formed name without an
    /// allow entry is `Blocked`. Names that fail normalization are `Unknown`.
    pub fn classify(&self, name: &str) -> Classification {
        match normalize_query(name) {
            Ok(name) => self.classify_name(&name),
            Err(_) => Classification::Unknown,
        }
    }

    /// Classify an already-validated name. Single-label names are `Unknown`.
    pub fn classify_name(&self, name: &DomainName) -> Classification {
        if name.label_count() < 2 {
            return Classification::Unknown;
        }

        let labels: Vec<&str> = name.labels().collect();
        let mut node = &self.root;
        let mut blocked = false;

        for label in labels.iter().rev() {
            // A label remains below `node`, so its wildcards apply.
            if node.allow.wildcard {
                return Classification::Allowed;
            }
            blocked |= node.block.wildcard;

            match node.child(label) {
                Some(next) => node = next,
                None => return self.fallback(blocked),
            }

            if node.allow.subtree {
                return Classification::Allowed;
            }
            blocked |= node.block.subtree;
        }

        self.fallback(blocked)
    }

    fn fallback(&self, blocked: bool) -> Classification {
        if blocked || self.allow_only {
            Classification::Blocked
        } else {
            Classification::Unknown
        }
    }
}

fn insert(root: &mut Node, entry: &str, kind: Kind) {
    let (wildcard, name) = match entry.strip_prefix("*.") {
        Some(rest) => (true, rest),
        None => (false, entry),
    };

    let mut node = root;
    for label in name.rsplit('.') {
        node = node.child_mut(label);
    }

    let marks = match kind {
        Kind::Block => &mut node.block,
        Kind::Allow => &mut node.allow,
    };
    if wildcard {
        marks.wildcard = true;
    } else {
        marks.subtree = true;
    }
}

/// Lower-case, strip the trailing dot and enforce the name limits.
pub fn normalize_query(name: &str) -> Result<DomainName, ClassifyError> {
    let trimmed = name.trim();
    if trimmed.len() > MAX_NAME_LEN + 1 {
        return Err(ClassifyError::Malformed);
    }

    let name = DomainName::from_ascii(trimmed).map_err(|_| ClassifyError::Malformed)?;
    if name.label_count() < 2 {
        return Err(ClassifyError::SingleLabel);
    }
    Ok(name)
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod index_tests;
