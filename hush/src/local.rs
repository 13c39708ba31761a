use std::time::{Duration, Instant};

/// Local state for a DNS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    /// Whether the response was served from cache.
    pub cache_hit: bool,

    /// Whether the request was answered with a sinkhole response.
    pub blocked: bool,

    /// When the request was started
    pub time_started: Instant,
}

impl Local {
    pub fn time_elapsed(&self) -> Duration {
        self.time_started.elapsed()
    }

    /// Whether the response came from upstream and may be cached.
    pub fn cacheable(&self) -> bool {
        !self.cache_hit && !self.blocked
    }
}

impl Default for Local {
    fn default() -> Self {
        Self {
            cache_hit: Default::default(),
            blocked: Default::default(),
            time_started: Instant::now(),
        }
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod local_tests;
