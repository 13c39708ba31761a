use std::{
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Upstream servers, tried in rotating order.
#[derive(Debug)]
pub struct Upstreams {
    list: Box<[SocketAddr]>,
    /// Round-robin index
    rr: AtomicUsize,
}

impl Upstreams {
    pub fn new(addrs: &[SocketAddr]) -> Self {
        Self {
            list: addrs.into(),
            rr: AtomicUsize::new(0),
        }
    }

    /// Every upstream exactly once, starting one further along on each call.
    pub fn rotation(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        let n = self.list.len();
        let start = if n == 0 { 0 } else { self.rr.fetch_add(1, Ordering::Relaxed) % n };
        (0..n).map(move |off| self.list[(start + off) % n])
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
