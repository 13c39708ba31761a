use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use hush_dns::DnsMessage;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;

/// The transport a DNS request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    UDP,
    TCP,
}

/// Everything a middleware or resolver may look at while handling one query.
///
/// The message has already been decoded and checked by the listener.
#[derive(Debug)]
pub struct DnsRequestCtx<G, L> {
    request_type: RequestType,
    client: SocketAddr,
    raw: Bytes,
    message: DnsMessage,
    budget: RequestBudget,
    global: Arc<G>,
    local: RwLock<L>,
}

impl<G, L> DnsRequestCtx<G, L> {
    pub fn new(
        timeout: Duration,
        request_type: RequestType,
        client: SocketAddr,
        raw: Bytes,
        message: DnsMessage,
        global: Arc<G>,
        local: L,
    ) -> Self {
        Self {
            budget: RequestBudget::new(timeout),
            request_type,
            client,
            raw,
            message,
            global,
            local: RwLock::new(local),
        }
    }

    /// The deadline for the request.
    pub fn deadline(&self) -> Instant {
        self.budget.at()
    }

    /// Remaining time budget for the request.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.remaining()
    }

    pub fn budget(&self) -> &RequestBudget {
        &self.budget
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn client(&self) -> SocketAddr {
        self.client
    }

    pub fn message(&self) -> &DnsMessage {
        &self.message
    }

    /// Raw request bytes
    pub fn raw(&self) -> Bytes {
        self.raw.clone()
    }

    pub fn global(&self) -> &G {
        &self.global
    }

    pub fn local(&self) -> RwLockReadGuard<'_, L> {
        self.local.read()
    }

    pub fn local_mut(&self) -> RwLockWriteGuard<'_, L> {
        self.local.write()
    }
}

/// A step run before the resolver. Returning a response short-circuits the chain.
#[async_trait]
pub trait DnsMiddleware<G, L>: Send + Sync {
    async fn on_query(&self, ctx: &DnsRequestCtx<G, L>) -> anyhow::Result<Option<Bytes>>;
}

pub async fn run_middlewares<G, L>(
    mws: &[Arc<dyn DnsMiddleware<G, L>>],
    ctx: &DnsRequestCtx<G, L>,
) -> anyhow::Result<Option<Bytes>> {
    for m in mws {
        if let Some(resp) = m.on_query(ctx).await? {
            return Ok(Some(resp));
        }
    }
    Ok(None)
}

/// A budget for processing a DNS request, based on a deadline.
#[derive(Debug, Clone)]
pub struct RequestBudget {
    deadline: Instant,
}

impl RequestBudget {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn at(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        (now < self.deadline).then_some(self.deadline - now)
    }

    /// Deadline for one step: the request deadline or `per_step` from now,
    /// whichever comes first.
    pub fn cap(&self, per_step: Duration) -> Instant {
        let rem = self.remaining().unwrap_or_default();
        Instant::now() + rem.min(per_step)
    }
}
