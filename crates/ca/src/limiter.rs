use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use hush_dns::DomainName;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{IssueError, LimitScope};

/// Issuance ceilings over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub per_domain: usize,
    pub global: usize,
    pub window: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_domain: 10,
            global: 120,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct Windows {
    global: VecDeque<Instant>,
    per_domain: HashMap<DomainName, VecDeque<Instant>>,
}

/// Sliding-window limiter keyed by domain, with a global ceiling on top.
pub struct RateLimiter {
    limits: RateLimits,
    windows: Mutex<Windows>,
}

fn evict(window: &mut VecDeque<Instant>, cutoff: Option<Instant>) {
    let Some(cutoff) = cutoff else { return };
    while window.front().is_some_and(|t| *t <= cutoff) {
        window.pop_front();
    }
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Record one issuance for `domain`, or refuse without recording anything.
    pub fn try_acquire(&self, domain: &DomainName) -> Result<(), IssueError> {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.limits.window);
        let mut windows = self.windows.lock();

        evict(&mut windows.global, cutoff);
        if windows.global.len() >= self.limits.global {
            return Err(IssueError::RateLimited(LimitScope::Global));
        }

        // Drop idle domains so the map stays bounded by recent activity.
        windows.per_domain.retain(|_, w| {
            evict(w, cutoff);
            !w.is_empty()
        });

        let window = windows.per_domain.entry(domain.clone()).or_default();
        if window.len() >= self.limits.per_domain {
            return Err(IssueError::RateLimited(LimitScope::Domain));
        }

        window.push_back(now);
        windows.global.push_back(now);
        Ok(())
    }
}
