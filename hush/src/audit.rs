use std::{sync::Arc, time::Duration};

use hush_audit::{AuditEvent, AuditSink};
use serde::Serialize;
use tokio::{
    sync::{
        RwLock,
        mpsc::{self, Receiver, Sender},
    },
    time::{self, MissedTickBehavior},
};

pub enum AuditMessage {
    Shutdown,
    Event(AuditEvent),
    Query { blocked: bool, cached: bool },
    Error,
}

/// Counts answered queries and forwards audit events to the configured sink.
pub struct AuditService {
    rx: Receiver<AuditMessage>,
    sink: Arc<dyn AuditSink>,
    live_stats: Arc<RwLock<LiveStats>>,
    report_every: Duration,
}

/// Cheap to clone; never blocks. Messages are dropped when the service falls behind.
#[derive(Clone)]
pub struct AuditHandle(Sender<AuditMessage>);

impl AuditHandle {
    pub fn shutdown(&self) {
        if let Err(e) = self.0.try_send(AuditMessage::Shutdown) {
            tracing::error!("failed to send shutdown signal to audit service {}", e)
        }
    }

    pub fn query(&self, blocked: bool, cached: bool) {
        if let Err(e) = self.0.try_send(AuditMessage::Query { blocked, cached }) {
            tracing::debug!("failed to record query: {}", e)
        }
    }

    pub fn error(&self) {
        if let Err(e) = self.0.try_send(AuditMessage::Error) {
            tracing::debug!("failed to record error: {}", e)
        }
    }
}

impl AuditSink for AuditHandle {
    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.0.try_send(AuditMessage::Event(event)) {
            tracing::warn!("dropping audit event: {}", e)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LiveStats {
    pub total: usize,
    pub blocked: usize,
    pub cached: usize,
    pub errors: usize,
}

impl LiveStats {
    fn apply_query(&mut self, blocked: bool, cached: bool) {
        self.total += 1;
        self.blocked += usize::from(blocked);
        self.cached += usize::from(cached);
    }

    fn apply_error(&mut self) {
        self.total += 1;
        self.errors += 1;
    }
}

#[derive(Clone)]
pub struct Stats {
    live: Arc<RwLock<LiveStats>>,
}

impl Stats {
    pub async fn live(&self) -> LiveStats {
        let stats = self.live.read().await;
        stats.clone()
    }
}

impl AuditService {
    pub fn new(sink: Arc<dyn AuditSink>, buffer: usize, report_every: Duration) -> (AuditHandle, Stats, Self) {
        let live = Arc::new(RwLock::new(LiveStats::default()));

        let (tx, rx) = mpsc::channel::<AuditMessage>(buffer);
        (
            AuditHandle(tx),
            Stats { live: live.clone() },
            Self {
                rx,
                sink,
                live_stats: live,
                report_every,
            },
        )
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("Running audit service");

        let mut tick = time::interval(self.report_every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => self.report().await,
                msg = self.rx.recv() => {
                    match msg {
                        None | Some(AuditMessage::Shutdown) => {
                            tracing::info!("shutting down audit service");
                            self.report().await;
                            break;
                        },
                        Some(AuditMessage::Event(ev)) => self.sink.emit(ev),
                        Some(AuditMessage::Query { blocked, cached }) => {
                            self.live_stats.write().await.apply_query(blocked, cached);
                        }
                        Some(AuditMessage::Error) => self.live_stats.write().await.apply_error(),
                    }
                }
            }
        }

        Ok(())
    }

    async fn report(&self) {
        let stats = self.live_stats.read().await.clone();
        tracing::info!(
            total = stats.total,
            blocked = stats.blocked,
            cached = stats.cached,
            errors = stats.errors,
            "query stats"
        );
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod audit_tests;
