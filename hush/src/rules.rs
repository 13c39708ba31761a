use std::{path::Path, sync::Arc, time::Duration};

use hush_audit::{AuditEvent, AuditSink};
use hush_rules::{Loaded, RuleLoadError, RuleSet, RuleStore, parse_list};
use tokio::{
    task,
    time::{self, MissedTickBehavior},
};

use crate::config::RulesConfig;

/// Reads the rule layers and external lists from disk and merges them.
pub struct RuleLoader {
    config: RulesConfig,
}

impl RuleLoader {
    pub fn new(config: RulesConfig) -> Self {
        Self { config }
    }

    /// Read every layer and produce a merged rule set with external lists applied.
    ///
    /// Unreadable group or user files are skipped like malformed ones. Only a
    /// missing or invalid base layer fails the load.
    pub fn load(&self) -> Result<Loaded, RuleLoadError> {
        let base = read_optional(&self.config.base);

        let groups: Vec<(String, String)> = self
            .config
            .groups
            .iter()
            .filter_map(|path| read_optional(path).map(|body| (path.display().to_string(), body)))
            .collect();

        let user = self.config.user.as_deref().and_then(read_optional);

        let mut loaded = hush_rules::load(
            base.as_deref(),
            groups.iter().map(|(name, body)| (name.as_str(), body.as_str())),
            user.as_deref(),
            self.config.max_domains,
        )?;

        if let Some(dir) = &self.config.lists_dir {
            loaded.rules = self.apply_lists(loaded.rules, dir);
        }

        Ok(loaded)
    }

    fn apply_lists(&self, mut rules: RuleSet, dir: &Path) -> RuleSet {
        let sources: Vec<String> = rules.external_sources().to_vec();

        for source in sources {
            let path = dir.join(list_file_name(&source));
            let Some(body) = read_optional(&path) else {
                tracing::debug!(source = %source, path = %path.display(), "external list not fetched yet");
                continue;
            };

            match parse_list(&body, self.config.max_domains) {
                Ok(domains) => {
                    tracing::debug!(source = %source, domains = domains.len(), "applying external list");
                    rules = rules.with_external_list(&source, domains);
                }
                Err(e) => tracing::warn!(source = %source, "skipping external list: {}", e),
            }
        }

        rules
    }
}

/// File name an external list is stored under in the lists directory.
pub fn list_file_name(source: &str) -> String {
    let trimmed = source
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(source);

    trimmed
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot read rule file: {}", e);
            None
        }
    }
}

/// Load and publish. Returns the new version.
pub fn reload(loader: &RuleLoader, store: &RuleStore, audit: &dyn AuditSink) -> Result<u64, RuleLoadError> {
    let Loaded { rules, skipped } = loader.load()?;

    let block_count = rules.block_count();
    let allow_count = rules.allow_count();
    let allow_only = rules.allow_only();
    let version = store.swap(rules);

    audit.emit(AuditEvent::RuleLoaded {
        version,
        block_count,
        allow_count,
        allow_only,
        skipped_layers: skipped.len(),
    });

    Ok(version)
}

/// Reload the rules every `every`. A failed load keeps the current rules.
///
/// Each reload reads files and rebuilds the index, so it runs on the blocking pool.
pub async fn refresh_task(loader: RuleLoader, store: Arc<RuleStore>, audit: Arc<dyn AuditSink>, every: Duration) {
    let loader = Arc::new(loader);
    let mut tick = time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;

    loop {
        tick.tick().await;

        let (loader, store, audit) = (loader.clone(), store.clone(), audit.clone());
        let result = task::spawn_blocking(move || reload(&loader, &store, audit.as_ref())).await;

        match result {
            Ok(Ok(version)) => tracing::debug!(version, "rules refreshed"),
            Ok(Err(e)) => tracing::warn!("rule refresh failed, keeping previous rules: {}", e),
            Err(e) => tracing::error!("rule refresh task panicked: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod rules_tests;
