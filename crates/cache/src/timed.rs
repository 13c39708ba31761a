use std::{
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio::time::Instant;

/// A bounded, concurrent map whose entries carry an absolute expiry.
///
/// Backed by a sharded map: readers never block each other and writers only
/// contend when they hash to the same shard. When an insert would exceed the
/// capacity, expired entries are purged first and then the oldest entries
/// (by insertion time) are evicted, only as many as needed.
pub struct TimedCache<K, V> {
    map: DashMap<K, Slot<V>>,
    capacity: usize,
    seq: AtomicU64,
}

struct Slot<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
    /// Tie-breaker for entries inserted at the same instant.
    seq: u64,
}

/// A live entry returned by [`TimedCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl<K, V> TimedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::new(),
            capacity,
            seq: AtomicU64::new(0),
        }
    }

    /// Look up a live entry. Expired entries are removed on the way out.
    pub fn get(&self, key: &K) -> Option<Hit<V>> {
        let now = Instant::now();

        {
            let slot = self.map.get(key)?;
            if slot.expires_at > now {
                return Some(Hit {
                    value: slot.value.clone(),
                    inserted_at: slot.inserted_at,
                    expires_at: slot.expires_at,
                });
            }
        }

        self.map.remove_if(key, |_, slot| slot.expires_at <= now);
        None
    }

    /// Insert or replace an entry. Entries that are already expired are ignored.
    pub fn insert(&self, key: K, value: V, expires_at: Instant) {
        let now = Instant::now();
        if self.capacity == 0 || expires_at <= now {
            return;
        }

        if !self.map.contains_key(&key) && self.is_full() {
            self.make_room(1, now);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.map.insert(
            key,
            Slot {
                value,
                inserted_at: now,
                expires_at,
                seq,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, slot)| slot.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, slot| slot.expires_at > now);
        before.saturating_sub(self.map.len())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_full(&self) -> bool {
        self.map.len() >= self.capacity
    }

    /// Free space for `need` new entries.
    fn make_room(&self, need: usize, now: Instant) {
        self.map.retain(|_, slot| slot.expires_at > now);

        let len = self.map.len();
        if len + need <= self.capacity {
            return;
        }
        let excess = len + need - self.capacity;

        let mut ages: Vec<(Instant, u64, K)> = self
            .map
            .iter()
            .map(|e| (e.inserted_at, e.seq, e.key().clone()))
            .collect();

        if excess < ages.len() {
            ages.select_nth_unstable_by(excess, |a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            ages.truncate(excess);
        }

        for (_, _, key) in ages {
            self.map.remove(&key);
        }

        tracing::debug!(evicted = excess, capacity = self.capacity, "cache at capacity, evicted oldest entries");
    }
}
