use super::*;
use crate::layer::RuleLayer;

fn index(block: &[&str], allow: &[&str], allow_only: bool) -> BlocklistIndex {
    let layer = RuleLayer {
        block_domains: block.iter().map(|s| s.to_string()).collect(),
        allow_domains: allow.iter().map(|s| s.to_string()).collect(),
        sources: vec![],
        allow_only,
    };
    BlocklistIndex::build(&RuleSet::merge([&layer]))
}

#[test]
fn test_block_matches_domain_and_subdomains() {
    let index = index(&["ads.example.com"], &[], false);

    assert_eq!(index.classify("ads.example.com"), Classification::Blocked);
    assert_eq!(index.classify("x.ads.example.com"), Classification::Blocked);
    assert_eq!(index.classify("X.Ads.Example.Com."), Classification::Blocked);
    assert_eq!(index.classify("example.com"), Classification::Unknown);
    assert_eq!(index.classify("bads.example.com"), Classification::Unknown);
}

#[test]
fn test_allow_overrides_block() {
    let index = index(&["example.com"], &["good.example.com"], false);

    assert_eq!(index.classify("good.example.com"), Classification::Allowed);
    assert_eq!(index.classify("deep.good.example.com"), Classification::Allowed);
    assert_eq!(index.classify("other.example.com"), Classification::Blocked);
    assert_eq!(index.classify("example.com"), Classification::Blocked);
}

#[test]
fn test_allow_ancestor_beats_block_descendant() {
    let index = index(&["ads.example.com"], &["example.com"], false);

    assert_eq!(index.classify("ads.example.com"), Classification::Allowed);
    assert_eq!(index.classify("x.ads.example.com"), Classification::Allowed);
}

#[test]
fn test_wildcard_matches_strict_subdomains() {
    let index = index(&["*.tracker.net"], &[], false);

    assert_eq!(index.classify("a.tracker.net"), Classification::Blocked);
    assert_eq!(index.classify("a.b.tracker.net"), Classification::Blocked);
    assert_eq!(index.classify("tracker.net"), Classification::Unknown);
}

#[test]
fn test_wildcard_allow() {
    let index = index(&["cdn.net"], &["*.cdn.net"], false);

    assert_eq!(index.classify("cdn.net"), Classification::Blocked);
    assert_eq!(index.classify("img.cdn.net"), Classification::Allowed);
}

#[test]
fn test_allow_only_blocks_everything_else() {
    let index = index(&[], &["school.example.org"], true);

    assert!(index.allow_only());
    assert_eq!(index.classify("school.example.org"), Classification::Allowed);
    assert_eq!(index.classify("www.school.example.org"), Classification::Allowed);
    assert_eq!(index.classify("example.org"), Classification::Blocked);
    assert_eq!(index.classify("anything.test"), Classification::Blocked);
}

#[test]
fn test_malformed_names_are_unknown() {
    let index = index(&["com"], &[], true);

    let long = format!("{}.com", "a.".repeat(130));
    assert!(long.len() > 254);

    assert_eq!(index.classify("localhost"), Classification::Unknown);
    assert_eq!(index.classify(""), Classification::Unknown);
    assert_eq!(index.classify("a..b.com"), Classification::Unknown);
    assert_eq!(index.classify(&long), Classification::Unknown);
    assert_eq!(index.classify(&format!("{}.com", "x".repeat(64))), Classification::Unknown);
}

#[test]
fn test_every_block_entry_is_blocked_unless_allowed() {
    let block = ["a.example.com", "b.example.com", "c.b.example.com", "tracker.io"];
    let allow = ["b.example.com"];
    let index = index(&block, &allow, false);

    for domain in block {
        let covered_by_allow = allow.iter().any(|a| domain == *a || domain.ends_with(&format!(".{a}")));
        let expected = if covered_by_allow {
            Classification::Allowed
        } else {
            Classification::Blocked
        };
        assert_eq!(index.classify(domain), expected, "{domain}");
    }
}

#[test]
fn test_normalize_query() {
    assert_eq!(normalize_query("Example.COM.").unwrap().as_str(), "example.com");
    assert_eq!(normalize_query("localhost"), Err(ClassifyError::SingleLabel));
    assert_eq!(normalize_query("."), Err(ClassifyError::SingleLabel));
    assert_eq!(normalize_query("a..com"), Err(ClassifyError::Malformed));
}
