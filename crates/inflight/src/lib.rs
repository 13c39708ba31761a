use std::{
    fmt,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Why a coalesced operation produced no value.
#[derive(Debug, thiserror::Error)]
pub enum InflightError<E> {
    #[error("inflight operation cancelled")]
    Cancelled,
    #[error("inflight operation failed: {0}")]
    Failed(Arc<E>),
}

impl<E> Clone for InflightError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::Failed(e) => Self::Failed(Arc::clone(e)),
        }
    }
}

type Outcome<V, E> = Result<Arc<V>, InflightError<E>>;

/// Coalesces concurrent operations that share a key.
///
/// The first caller for a key starts the work; everyone arriving while it runs
/// awaits the same result. The work is cancelled once every waiter has gone away,
/// and the key is forgotten when the last waiter leaves, so the next caller
/// after that starts fresh.
pub struct Inflight<K, V, E> {
    map: Arc<DashMap<K, Arc<Entry<V, E>>>>,
}

impl<K, V, E> Default for Inflight<K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Inflight<K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            map: Arc::new(DashMap::new()),
        }
    }

    /// Run `make(token)` at most once per key among concurrent callers.
    ///
    /// `make` is only invoked by the caller that actually starts the work.
    /// The token fires when the last waiter drops before completion.
    pub async fn get_or_run<F, Fut>(&self, key: K, make: F) -> Outcome<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry as MapEntry;

        // Waiter registration happens under the shard lock, same as removal.
        let entry = match self.map.entry(key.clone()) {
            MapEntry::Occupied(e) => {
                e.get().waiters.fetch_add(1, Ordering::AcqRel);
                Arc::clone(e.get())
            }
            MapEntry::Vacant(v) => {
                let entry = Arc::new(Entry::new());
                v.insert(Arc::clone(&entry));
                entry
            }
        };

        let guard = WaiterGuard {
            entry: Arc::clone(&entry),
            key,
            map: Arc::clone(&self.map),
        };

        let token = entry.token.clone();
        let shared = entry
            .fut
            .get_or_init(|| async move {
                let work = make(token.child_token()).map(|res| match res {
                    Ok(v) => Ok(Arc::new(v)),
                    Err(e) => Err(InflightError::Failed(Arc::new(e))),
                });
                async move {
                    tokio::select! {
                        _ = token.cancelled() => Err(InflightError::Cancelled),
                        res = work => res,
                    }
                }
                .boxed()
                .shared()
            })
            .await
            .clone();

        let outcome = shared.await;
        drop(guard);
        outcome
    }

    /// Number of keys with work in progress.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

type EntryFut<V, E> = Shared<BoxFuture<'static, Outcome<V, E>>>;

struct Entry<V, E> {
    fut: OnceCell<EntryFut<V, E>>,
    token: CancellationToken,
    waiters: AtomicUsize,
}

impl<V, E> Entry<V, E> {
    fn new() -> Self {
        Self {
            fut: OnceCell::new(),
            token: CancellationToken::new(),
            waiters: AtomicUsize::new(1),
        }
    }
}

/// Tracks one waiter; the last one out removes the entry and cancels the work.
struct WaiterGuard<K: Eq + Hash + fmt::Debug, V, E> {
    entry: Arc<Entry<V, E>>,
    key: K,
    map: Arc<DashMap<K, Arc<Entry<V, E>>>>,
}

impl<K: Eq + Hash + fmt::Debug, V, E> Drop for WaiterGuard<K, V, E> {
    fn drop(&mut self) {
        let entry = &self.entry;
        let removed = self.map.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, entry) && current.waiters.fetch_sub(1, Ordering::AcqRel) == 1
        });

        if removed.is_some() {
            tracing::trace!(key = ?self.key, "last inflight waiter left");
            self.entry.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Duration};

    use super::*;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let inflight: Arc<Inflight<&'static str, u32, anyhow::Error>> = Arc::new(Inflight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let inflight = Arc::clone(&inflight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                inflight
                    .get_or_run("key", move |_| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(*value, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let inflight: Arc<Inflight<u8, u32, anyhow::Error>> = Arc::new(Inflight::new());

        let a = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                inflight
                    .get_or_run(1, |_| async {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(anyhow::anyhow!("boom"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = inflight.get_or_run(1, |_| async { Ok(1) }).await;

        let a = a.await.unwrap();
        assert!(matches!(a, Err(InflightError::Failed(_))));
        assert!(matches!(b, Err(InflightError::Failed(ref e)) if e.to_string() == "boom"));
    }

    #[tokio::test]
    async fn test_new_run_after_completion() {
        let inflight: Inflight<u8, u32, anyhow::Error> = Inflight::new();

        let first = inflight.get_or_run(1, |_| async { Ok(1) }).await.unwrap();
        let second = inflight.get_or_run(1, |_| async { Ok(2) }).await.unwrap();

        assert_eq!(*first, 1);
        assert_eq!(*second, 2);
    }

    #[tokio::test]
    async fn test_last_waiter_dropping_cancels_work() {
        let inflight: Arc<Inflight<u8, u32, anyhow::Error>> = Arc::new(Inflight::new());
        let (tx, rx) = tokio::sync::oneshot::channel();

        let handle = {
            let inflight = Arc::clone(&inflight);
            tokio::spawn(async move {
                inflight
                    .get_or_run(1, move |token| {
                        let _ = tx.send(token.clone());
                        async move {
                            token.cancelled().await;
                            Ok(0)
                        }
                    })
                    .await
            })
        };

        let token = rx.await.unwrap();
        assert!(!token.is_cancelled());

        handle.abort();
        let _ = handle.await;

        assert!(token.is_cancelled());
        assert!(inflight.is_empty());
    }
}
