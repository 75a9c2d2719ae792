use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

use crawl_cache_core::{CacheError, CacheKey, Result};

/// Whether a caller ran the work or waited for someone else's
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Removes the in-flight registration when the work finishes or panics
struct Registration<T> {
    inflight: Arc<DashMap<CacheKey, broadcast::Sender<Result<T>>>>,
    key: CacheKey,
    tx: broadcast::Sender<Result<T>>,
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        self.inflight
            .remove_if(&self.key, |_, tx| tx.same_channel(&self.tx));
    }
}

/// Removes the refresh marker even if the refresh task panics
struct RefreshMarker {
    refreshing: Arc<DashMap<CacheKey, ()>>,
    key: CacheKey,
}

impl Drop for RefreshMarker {
    fn drop(&mut self) {
        self.refreshing.remove(&self.key);
    }
}

/// Per-key request coalescing
///
/// The first caller for a key starts the work on its own task; callers
/// arriving while it runs wait and receive a clone of the same result, error
/// included. The work outlives any caller, so a cancelled leader does not
/// fail the others. Nothing is remembered afterwards, so the next caller
/// after completion starts fresh.
pub struct SingleFlight<T> {
    inflight: Arc<DashMap<CacheKey, broadcast::Sender<Result<T>>>>,
    // Keys currently being refreshed in background (SWR)
    refreshing: Arc<DashMap<CacheKey, ()>>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            inflight: self.inflight.clone(),
            refreshing: self.refreshing.clone(),
        }
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            refreshing: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` once per key across concurrent callers
    pub async fn execute<F, Fut>(&self, key: &CacheKey, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.run(key, f).await.0
    }

    /// Like [`execute`](Self::execute) but also reports the caller's role
    pub async fn run<F, Fut>(&self, key: &CacheKey, f: F) -> (Result<T>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        // The entry lock is held only for the check-and-register.
        let action = match self.inflight.entry(*key) {
            Entry::Occupied(occupied) => Ok(occupied.get().subscribe()),
            Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx.clone());
                Err(Registration {
                    inflight: self.inflight.clone(),
                    key: *key,
                    tx,
                })
            }
        };

        match action {
            Ok(mut rx) => {
                let result = match rx.recv().await {
                    Ok(result) => result,
                    // Work panicked before producing a result
                    Err(_) => Err(abandoned(key)),
                };
                (result, Role::Follower)
            }
            Err(registration) => {
                let work = f();
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    let tx = registration.tx.clone();
                    drop(registration);

                    if tx.receiver_count() > 0 {
                        let _ = tx.send(result.clone());
                    }
                    result
                });
                let result = handle.await.unwrap_or_else(|_| Err(abandoned(key)));
                (result, Role::Leader)
            }
        }
    }

    /// Try to spawn a background refresh task for the given key.
    /// If a refresh is already running for this key, this is a no-op.
    pub fn try_spawn_refresh<F, Fut>(&self, key: &CacheKey, task_factory: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self.refreshing.entry(*key) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
            }
            Entry::Occupied(_) => return false,
        }

        let marker = RefreshMarker {
            refreshing: self.refreshing.clone(),
            key: *key,
        };
        let task = task_factory();
        tokio::spawn(async move {
            let _marker = marker;
            task.await;
        });
        true
    }

    /// Number of keys with a fill in progress
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inflight.contains_key(key)
    }

    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.refreshing.contains_key(key)
    }
}

fn abandoned(key: &CacheKey) -> CacheError {
    CacheError::Internal(format!("in-flight fill for {key} was abandoned"))
}
