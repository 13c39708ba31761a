use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use hush_ca::{CaConfig, CertCacheConfig, RateLimits};
use hush_cache::DnsCacheConfig;
use hush_intercept::InterceptConfig;
use hush_resolver::forwarder::ForwardConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Level, level_filters::LevelFilter};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[default]
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        LevelFilter::from_level(value.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// IP address to listen on for DNS queries.
    #[serde(default = "default_server_ip")]
    pub ip: IpAddr,
    /// Port to listen on for DNS queries (UDP and TCP).
    #[serde(default = "default_server_port")]
    pub port: u16,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: default_server_ip(),
            port: default_server_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub upstreams: Vec<SocketAddr>,
    /// Time allowed to answer one query, all upstream attempts included.
    pub timeout_ms: u64,
    /// Time allowed for one attempt against one upstream.
    pub attempt_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            upstreams: vec![
                SocketAddr::from(([1, 1, 1, 1], 53)),
                SocketAddr::from(([9, 9, 9, 9], 53)),
            ],
            timeout_ms: 3000,
            attempt_timeout_ms: 1500,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn forward_config(&self, cache: &CacheConfig) -> ForwardConfig {
        ForwardConfig {
            upstreams: self.upstreams.clone(),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            max_ttl: Duration::from_secs(cache.max_ttl_secs as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_ttl_secs: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn dns_cache_config(&self) -> DnsCacheConfig {
        DnsCacheConfig {
            max_entries: self.max_entries,
            max_ttl: Duration::from_secs(self.max_ttl_secs.into()),
        }
    }
}

/// Answer for blocked queries that are neither A nor AAAA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NonAddressAnswer {
    /// Empty NOERROR.
    #[default]
    NoData,
    NxDomain,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkholeConfig {
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
    pub ttl_secs: u32,
    pub non_address: NonAddressAnswer,
}

impl Default for SinkholeConfig {
    fn default() -> Self {
        Self {
            ipv4: Ipv4Addr::LOCALHOST,
            ipv6: Ipv6Addr::LOCALHOST,
            ttl_secs: 10,
            non_address: NonAddressAnswer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Base layer document. Required.
    pub base: PathBuf,
    pub groups: Vec<PathBuf>,
    pub user: Option<PathBuf>,
    /// Directory holding already-fetched external lists, one file per source.
    pub lists_dir: Option<PathBuf>,
    pub max_domains: usize,
    /// Interval between rule reloads. Zero disables reloading.
    pub refresh_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            base: PathBuf::from("rules/base.json"),
            groups: Vec::new(),
            user: None,
            lists_dir: None,
            max_domains: hush_rules::DEFAULT_MAX_DOMAINS,
            refresh_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaSettings {
    /// Directory holding the root key and certificate.
    pub dir: PathBuf,
    pub common_name: String,
    pub leaf_validity_secs: u64,
    pub clock_skew_secs: u64,
    pub per_domain_per_window: usize,
    pub global_per_window: usize,
    pub window_secs: u64,
    pub issue_timeout_ms: u64,
}

impl Default for CaSettings {
    fn default() -> Self {
        let ca = CaConfig::default();
        let cache = CertCacheConfig::default();
        Self {
            dir: PathBuf::from("ca"),
            common_name: ca.common_name,
            leaf_validity_secs: ca.leaf_validity.as_secs(),
            clock_skew_secs: ca.clock_skew.as_secs(),
            per_domain_per_window: ca.limits.per_domain,
            global_per_window: ca.limits.global,
            window_secs: ca.limits.window.as_secs(),
            issue_timeout_ms: cache.issue_timeout.as_millis() as u64,
        }
    }
}

impl CaSettings {
    pub fn ca_config(&self) -> CaConfig {
        CaConfig {
            common_name: self.common_name.clone(),
            leaf_validity: Duration::from_secs(self.leaf_validity_secs),
            clock_skew: Duration::from_secs(self.clock_skew_secs),
            limits: RateLimits {
                per_domain: self.per_domain_per_window,
                global: self.global_per_window,
                window: Duration::from_secs(self.window_secs),
            },
            ..CaConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct InterceptSettings {
    pub enabled: bool,
    pub ip: IpAddr,
    pub port: u16,
    pub handshake_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub cert_cache_entries: usize,
}

impl Default for InterceptSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 443,
            handshake_timeout_ms: 5000,
            request_timeout_ms: 10_000,
            cert_cache_entries: CertCacheConfig::default().max_entries,
        }
    }
}

impl InterceptSettings {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn intercept_config(&self) -> InterceptConfig {
        InterceptConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn cert_cache_config(&self, ca: &CaSettings) -> CertCacheConfig {
        CertCacheConfig {
            max_entries: self.cert_cache_entries,
            issue_timeout: Duration::from_millis(ca.issue_timeout_ms),
            ..CertCacheConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub resolver: ResolverConfig,
    pub cache: CacheConfig,
    pub sinkhole: SinkholeConfig,
    pub rules: RulesConfig,
    pub ca: CaSettings,
    pub intercept: InterceptSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found")]
    NotFound,
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Decode(String),
}

fn decode_from_path(path: &Path) -> Result<Config, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ConfigError::NotFound),
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&content).map_err(|e| ConfigError::Decode(e.message().into()))
}

/// Load the config, writing a default one to `config_path` if there is none.
pub fn load_config(config_path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = config_path.as_ref();
    match decode_from_path(path) {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NotFound) => create_default_config(path),
        Err(e) => Err(e.into()),
    }
}

pub fn create_default_config(path: &Path) -> anyhow::Result<Config> {
    let cfg = Config::default();

    let toml_str = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml_str)?;

    Ok(cfg)
}

fn default_server_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_server_port() -> u16 {
    53
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
