use std::time::Duration;

use super::*;

#[test]
fn test_local_default() {
    let local = Local::default();

    assert!(!local.cache_hit);
    assert!(!local.blocked);
    assert!(local.cacheable());
}

#[test]
fn test_local_time_elapsed() {
    let local = Local::default();

    std::thread::sleep(Duration::from_millis(10));

    let elapsed = local.time_elapsed();
    assert!(elapsed >= Duration::from_millis(10));
    assert!(elapsed < Duration::from_secs(1));
}

#[test]
fn test_cached_or_blocked_is_not_cacheable() {
    let hit = Local {
        cache_hit: true,
        ..Default::default()
    };
    let blocked = Local {
        blocked: true,
        ..Default::default()
    };

    assert!(!hit.cacheable());
    assert!(!blocked.cacheable());
}
