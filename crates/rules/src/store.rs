use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;

use crate::{
    index::{BlocklistIndex, Classification},
    ruleset::RuleSet,
};

/// A published rule set together with the index built from it.
#[derive(Debug)]
pub struct RuleSnapshot {
    pub version: u64,
    pub rules: RuleSet,
    pub index: BlocklistIndex,
}

impl RuleSnapshot {
    /// Whether a name must be treated as blocked: an explicit block match, or
    /// anything short of an explicit allow in allow-only mode.
    pub fn is_blocked(&self, name: &str) -> bool {
        match self.index.classify(name) {
            Classification::Blocked => true,
            Classification::Allowed => false,
            Classification::Unknown => self.index.allow_only(),
        }
    }
}

/// Holds the active rules. Reads are lock-free; a swap publishes a whole new
/// snapshot and readers holding the old one keep using it until they drop it.
pub struct RuleStore {
    current: ArcSwap<RuleSnapshot>,
    next_version: AtomicU64,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(RuleSet::default())
    }
}

impl RuleStore {
    pub fn new(rules: RuleSet) -> Self {
        let index = BlocklistIndex::build(&rules);
        Self {
            current: ArcSwap::from_pointee(RuleSnapshot {
                version: 1,
                rules,
                index,
            }),
            next_version: AtomicU64::new(2),
        }
    }

    pub fn current(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// Build the index for `rules` and publish it. Returns the new version.
    pub fn swap(&self, rules: RuleSet) -> u64 {
        let index = BlocklistIndex::build(&rules);
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            version,
            block = rules.block_count(),
            allow = rules.allow_count(),
            allow_only = rules.allow_only(),
            "publishing rule set"
        );

        self.current.store(Arc::new(RuleSnapshot { version, rules, index }));
        version
    }

    pub fn classify(&self, name: &str) -> Classification {
        self.current.load().index.classify(name)
    }

    pub fn is_blocked(&self, name: &str) -> bool {
        self.current.load().is_blocked(name)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::layer::RuleLayer;

    fn rules(block: &[&str], allow: &[&str], allow_only: bool) -> RuleSet {
        RuleSet::merge([&RuleLayer {
            block_domains: block.iter().map(|s| s.to_string()).collect(),
            allow_domains: allow.iter().map(|s| s.to_string()).collect(),
            sources: vec![],
            allow_only,
        }])
    }

    #[test]
    fn test_swap_publishes_new_version() {
        let store = RuleStore::new(rules(&["ads.example.com"], &[], false));
        let before = store.current();

        assert_eq!(before.version, 1);
        assert!(store.is_blocked("ads.example.com"));

        let version = store.swap(rules(&[], &[], false));
        assert_eq!(version, 2);
        assert!(!store.is_blocked("ads.example.com"));

        // A reader holding the old snapshot still sees it whole.
        assert!(before.is_blocked("ads.example.com"));
        assert_eq!(store.current().version, 2);
    }

    #[test]
    fn test_allow_only_blocks_malformed_names() {
        let store = RuleStore::new(rules(&[], &["ok.example.com"], true));

        assert!(!store.is_blocked("ok.example.com"));
        assert!(store.is_blocked("localhost"));
        assert!(store.is_blocked("other.example.com"));
        assert_eq!(store.classify("localhost"), Classification::Unknown);
    }

    #[test]
    fn test_concurrent_readers_see_consistent_snapshots() {
        let store = Arc::new(RuleStore::new(rules(&["a.example.com", "b.example.com"], &[], false)));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let snapshot = store.current();
                        // Both entries are always published together.
                        assert_eq!(
                            snapshot.is_blocked("a.example.com"),
                            snapshot.is_blocked("b.example.com")
                        );
                    }
                })
            })
            .collect();

        for i in 0..100 {
            if i % 2 == 0 {
                store.swap(rules(&[], &[], false));
            } else {
                store.swap(rules(&["a.example.com", "b.example.com"], &[], false));
            }
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
