//! Structured audit events emitted by the resolver, the CA and the interception
//! server, and the sink boundary they are handed to.
//!
//! The core never depends on what a sink does with an event: sinks must not block
//! and must not fail loudly.

use std::{net::IpAddr, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;

/// Where a block/allow decision was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Dns,
    Intercept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RateLimited,
    InvalidDomain,
    NotBlocked,
    Signing,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Blocked {
        domain: String,
        surface: Surface,
        #[serde(skip_serializing_if = "Option::is_none")]
        qtype: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client: Option<IpAddr>,
    },
    Allowed {
        domain: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        qtype: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client: Option<IpAddr>,
    },
    CertIssued {
        domain: String,
        /// Hex-encoded serial number.
        serial: String,
        /// Unix seconds.
        not_after: i64,
    },
    CertDenied {
        domain: String,
        reason: DenyReason,
    },
    RuleLoaded {
        version: u64,
        block_count: usize,
        allow_count: usize,
        allow_only: bool,
        skipped_layers: usize,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::Blocked { .. } => "blocked",
            AuditEvent::Allowed { .. } => "allowed",
            AuditEvent::CertIssued { .. } => "cert_issued",
            AuditEvent::CertDenied { .. } => "cert_denied",
            AuditEvent::RuleLoaded { .. } => "rule_loaded",
        }
    }

    /// JSON rendering used by log-based sinks.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"event\":\"{}\"}}", self.name()))
    }
}

/// Receives audit events. Implementations must return quickly.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn emit(&self, event: AuditEvent) {
        (**self).emit(event)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Writes each event as a JSON line on the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(target: "audit", event = event.name(), "{}", event.to_json());
    }
}

/// Keeps events in memory, for inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let event = AuditEvent::Blocked {
            domain: "ads.example.com".into(),
            surface: Surface::Dns,
            qtype: Some(1),
            client: None,
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["event"], "blocked");
        assert_eq!(value["surface"], "dns");
        assert_eq!(value["qtype"], 1);
        assert!(value.get("client").is_none());
    }

    #[test]
    fn test_names_match_tags() {
        let events = [
            AuditEvent::Allowed {
                domain: "a.example".into(),
                qtype: None,
                client: None,
            },
            AuditEvent::CertIssued {
                domain: "a.example".into(),
                serial: "01".into(),
                not_after: 0,
            },
            AuditEvent::CertDenied {
                domain: "a.example".into(),
                reason: DenyReason::RateLimited,
            },
            AuditEvent::RuleLoaded {
                version: 1,
                block_count: 0,
                allow_count: 0,
                allow_only: false,
                skipped_layers: 0,
            },
        ];

        for event in events {
            let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn test_memory_sink_through_arc() {
        let sink = Arc::new(MemorySink::new());
        let dyn_sink: Arc<dyn AuditSink> = sink.clone();

        dyn_sink.emit(AuditEvent::CertDenied {
            domain: "x.example".into(),
            reason: DenyReason::Timeout,
        });

        assert_eq!(sink.count("cert_denied"), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
