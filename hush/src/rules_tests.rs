use hush_audit::MemorySink;
use hush_rules::Classification;
use tempfile::TempDir;

use super::*;

struct Layout {
    dir: TempDir,
}

impl Layout {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, name: &str, body: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    fn config(&self) -> RulesConfig {
        RulesConfig {
            base: self.dir.path().join("base.json"),
            lists_dir: Some(self.dir.path().join("lists")),
            ..Default::default()
        }
    }
}

#[test]
fn test_list_file_name() {
    assert_eq!(
        list_file_name("https://lists.example.com/ads/hosts.txt?v=2"),
        "lists.example.com_ads_hosts.txt_v_2"
    );
    assert_eq!(list_file_name("plain-name.txt"), "plain-name.txt");
}

#[test]
fn test_loads_all_layers() {
    let layout = Layout::new();
    layout.write("base.json", r#"{"blockDomains": ["ads.example.com"]}"#);
    let group = layout.write("group.json", r#"{"blockDomains": ["games.example.com"]}"#);
    let user = layout.write("user.json", r#"{"allowDomains": ["ok.games.example.com"]}"#);

    let loader = RuleLoader::new(RulesConfig {
        groups: vec![group],
        user: Some(user),
        ..layout.config()
    });
    let loaded = loader.load().unwrap();
    let store = RuleStore::new(loaded.rules);

    assert_eq!(store.classify("x.ads.example.com"), Classification::Blocked);
    assert_eq!(store.classify("games.example.com"), Classification::Blocked);
    assert_eq!(store.classify("ok.games.example.com"), Classification::Allowed);
    assert!(loaded.skipped.is_empty());
}

#[test]
fn test_missing_base_fails() {
    let layout = Layout::new();
    let err = RuleLoader::new(layout.config()).load().unwrap_err();
    assert!(matches!(err, RuleLoadError::MissingBase));
}

#[test]
fn test_malformed_group_is_skipped() {
    let layout = Layout::new();
    layout.write("base.json", r#"{"blockDomains": ["ads.example.com"]}"#);
    let group = layout.write("group.json", "{ not json");

    let loaded = RuleLoader::new(RulesConfig {
        groups: vec![group],
        ..layout.config()
    })
    .load()
    .unwrap();

    assert_eq!(loaded.skipped.len(), 1);
    assert_eq!(loaded.rules.block_count(), 1);
}

#[test]
fn test_external_lists_apply_for_referenced_sources() {
    let layout = Layout::new();
    layout.write(
        "base.json",
        r#"{"sources": ["https://lists.example.com/hosts"], "blockDomains": []}"#,
    );
    layout.write(
        "lists/lists.example.com_hosts",
        "# hosts\n0.0.0.0 tracker.example.net\n0.0.0.0 localhost\n",
    );
    layout.write("lists/unreferenced", "evil.example.org\n");

    let loaded = RuleLoader::new(layout.config()).load().unwrap();
    let store = RuleStore::new(loaded.rules);

    assert_eq!(store.classify("tracker.example.net"), Classification::Blocked);
    assert_eq!(store.classify("evil.example.org"), Classification::Unknown);
}

#[test]
fn test_reload_swaps_and_audits() {
    let layout = Layout::new();
    layout.write("base.json", r#"{"blockDomains": ["ads.example.com"]}"#);
    let loader = RuleLoader::new(layout.config());
    let store = RuleStore::default();
    let sink = MemorySink::new();

    let version = reload(&loader, &store, &sink).unwrap();

    assert_eq!(store.current().version, version);
    assert!(store.is_blocked("ads.example.com"));
    assert_eq!(
        sink.events(),
        vec![AuditEvent::RuleLoaded {
            version,
            block_count: 1,
            allow_count: 0,
            allow_only: false,
            skipped_layers: 0,
        }]
    );
}

#[test]
fn test_failed_reload_keeps_previous_rules() {
    let layout = Layout::new();
    let base = layout.write("base.json", r#"{"blockDomains": ["ads.example.com"]}"#);
    let loader = RuleLoader::new(layout.config());
    let store = RuleStore::default();
    let sink = MemorySink::new();

    let version = reload(&loader, &store, &sink).unwrap();

    std::fs::write(&base, "garbage").unwrap();
    assert!(reload(&loader, &store, &sink).is_err());

    assert_eq!(store.current().version, version);
    assert!(store.is_blocked("ads.example.com"));
    assert_eq!(sink.count("rule_loaded"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_task_picks_up_changes() {
    let layout = Layout::new();
    let base = layout.write("base.json", r#"{"blockDomains": ["ads.example.com"]}"#);
    let store = Arc::new(RuleStore::default());
    let sink = Arc::new(MemorySink::new());

    let task = tokio::spawn(refresh_task(
        RuleLoader::new(layout.config()),
        store.clone(),
        sink.clone(),
        Duration::from_secs(60),
    ));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(store.is_blocked("ads.example.com"));

    std::fs::write(&base, r#"{"blockDomains": ["tracker.example.net"]}"#).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(store.is_blocked("tracker.example.net"));
    assert!(!store.is_blocked("ads.example.com"));
    assert_eq!(sink.count("rule_loaded"), 2);

    // A broken base file is skipped and the next good one is picked up.
    std::fs::write(&base, "garbage").unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(store.is_blocked("tracker.example.net"));
    assert_eq!(sink.count("rule_loaded"), 2);

    std::fs::write(&base, r#"{"blockDomains": ["ads.example.com"]}"#).unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(store.is_blocked("ads.example.com"));
    assert_eq!(sink.count("rule_loaded"), 3);
    assert!(!task.is_finished());

    task.abort();
}
