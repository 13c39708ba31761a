use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use audit::AuditService;
use config::{Config, DEFAULT_CONFIG_PATH, LogFormat, load_config};
use futures::FutureExt;
use global::Global;
use hush_audit::{AuditSink, TracingSink};
use hush_ca::{CertCache, CertificateAuthority, FileStore};
use hush_cache::DnsCache;
use hush_context::DnsMiddleware;
use hush_dns::DnsMessage;
use hush_intercept::InterceptServer;
use hush_resolver::forwarder::ForwardResolver;
use hush_rules::RuleStore;
use hush_server::{DnsServer, ErrorCallback, ServerState, SuccessCallback};
use local::Local;
use middleware::{cache::CacheMiddleware, policy::PolicyMiddleware};
use rules::RuleLoader;
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking;
use tracing_subscriber::{Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod audit;
mod config;
mod global;
mod local;
mod middleware;
mod rules;

/// How often live query counters are written to the log.
const STATS_INTERVAL: Duration = Duration::from_secs(300);

/// How often expired DNS cache entries are dropped.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (nb, _guard) = non_blocking(std::io::stdout());

    let config_path = env::var("HUSH_CONFIG").unwrap_or(DEFAULT_CONFIG_PATH.to_string());

    let config = load_config(&config_path)?;

    let fmt_layer = match config.server.log_format {
        LogFormat::Text => fmt::layer().with_writer(nb).with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(nb).boxed(),
    };
    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(LevelFilter::from(config.server.log_level)))
        .init();

    let (audit, stats, audit_service) = AuditService::new(Arc::new(TracingSink), 4096, STATS_INTERVAL);
    tokio::spawn(audit_service.run());

    let rule_store = Arc::new(RuleStore::default());
    let loader = RuleLoader::new(config.rules.clone());
    rules::reload(&loader, &rule_store, &audit).context("failed to load base rules")?;

    if config.rules.refresh_secs > 0 {
        tokio::spawn(rules::refresh_task(
            loader,
            rule_store.clone(),
            Arc::new(audit.clone()),
            Duration::from_secs(config.rules.refresh_secs),
        ));
    }

    if config.intercept.enabled {
        let intercept = start_intercept(&config, rule_store.clone(), Arc::new(audit.clone())).await?;
        tokio::spawn(async move {
            if let Err(e) = intercept.run().await {
                tracing::error!("interception server exited with error: {e:#}");
            }
        });
    }

    let global = Arc::new(Global {
        cache: DnsCache::new(config.cache.dns_cache_config()),
        rules: rule_store,
        audit: audit.clone(),
        sinkhole: config.sinkhole.clone(),
        max_ttl: config.cache.max_ttl_secs,
    });
    tokio::spawn(global.clone().cache_maintenance(stats, CACHE_PURGE_INTERVAL));

    let middlewares: Vec<Arc<dyn DnsMiddleware<Global, Local>>> =
        vec![Arc::new(PolicyMiddleware), Arc::new(CacheMiddleware)];

    let on_success: SuccessCallback<Global, Local> = Arc::new(|ctx, resp| {
        async move {
            let local = ctx.local().clone();
            ctx.global().audit.query(local.blocked, local.cache_hit);

            if local.cacheable() {
                let resp_msg = DnsMessage::decode(resp)?;
                ctx.global().cache.insert(ctx.message(), &resp_msg);
            }
            tracing::trace!(elapsed = ?local.time_elapsed(), "answered");
            Ok(())
        }
        .boxed()
    });

    let on_error: ErrorCallback<Global, Local> = Arc::new(|ctx, err| {
        async move {
            let question = ctx.message().question();
            tracing::warn!(
                qname = question.map(|q| q.qname.as_str()).unwrap_or_default(),
                client = %ctx.client(),
                "Error processing request: {}",
                err
            );
            ctx.global().audit.error();
            Ok(())
        }
        .boxed()
    });

    let state = ServerState {
        resolver: Arc::new(ForwardResolver::new(&config.resolver.forward_config(&config.cache))),
        middlewares: Arc::new(middlewares),
        on_success: Some(on_success),
        on_error: Some(on_error),
        global,
        timeout: config.resolver.timeout(),
    };

    let server = DnsServer::bind(config.server.addr(), state)
        .await
        .with_context(|| format!("failed to bind DNS listeners on {}", config.server.addr()))?;

    tokio::select! {
        r = server.run() => {
            if let Err(e) = r {
                tracing::error!("DNS server exited with error: {}", e);
            }
        },
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        },
    }

    audit.shutdown();

    Ok(())
}

/// Load the CA (fatal if it cannot be loaded or created) and bind the HTTPS listener.
async fn start_intercept(
    config: &Config,
    rules: Arc<RuleStore>,
    audit: Arc<dyn AuditSink>,
) -> anyhow::Result<InterceptServer> {
    let store = FileStore::new(&config.ca.dir);
    let ca = CertificateAuthority::load_or_create(&store, config.ca.ca_config()).context("failed to initialize CA")?;
    tracing::info!(path = %store.path(hush_ca::ROOT_CERT_NAME).display(), "root certificate ready");

    let root = ca.root_cert().clone();
    let certs = CertCache::new(
        Arc::new(ca),
        audit.clone(),
        config.intercept.cert_cache_config(&config.ca),
    );

    InterceptServer::bind(
        config.intercept.addr(),
        rules,
        certs,
        root,
        audit,
        config.intercept.intercept_config(),
    )
    .await
    .with_context(|| format!("failed to bind interception listener on {}", config.intercept.addr()))
}
