// src/cache.rs
//! Request coalescing.
//!
//! [`ThrottledRequests`] lets repeated reads within a time window share one
//! network call. [`SingleFlight`] makes concurrent identical writes share one
//! execution so a double submit never reaches the bundler twice.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{AaError, AaResult};

type SharedResult<V> = Shared<BoxFuture<'static, AaResult<V>>>;

struct ThrottleEntry<V> {
    generation: u64,
    started: Instant,
    future: SharedResult<V>,
}

pub struct ThrottledRequests<K, V> {
    entries: Arc<Mutex<HashMap<K, ThrottleEntry<V>>>>,
    next_generation: AtomicU64,
}

impl<K, V> Default for ThrottledRequests<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<K, V> ThrottledRequests<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the result of `request_fn`, reusing the call started for `key`
    /// if it began less than `window` ago.
    ///
    /// The entry is dropped `window` after it settles, unless a newer call has
    /// replaced it in the meantime.
    pub async fn request<F, Fut>(&self, key: K, request_fn: F, window: Duration) -> AaResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AaResult<V>> + Send + 'static,
    {
        let future = {
            let mut entries = self.entries.lock();
            let reusable = entries
                .get(&key)
                .filter(|entry| entry.started.elapsed() < window)
                .map(|entry| entry.future.clone());
            match reusable {
                Some(future) => {
                    debug!("Reusing throttled request for {:?}", key);
                    future
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let future = request_fn().boxed().shared();
                    entries.insert(
                        key.clone(),
                        ThrottleEntry {
                            generation,
                            started: Instant::now(),
                            future: future.clone(),
                        },
                    );
                    self.schedule_cleanup(key, generation, future.clone(), window);
                    future
                }
            }
        };
        future.await
    }

    fn schedule_cleanup(&self, key: K, generation: u64, future: SharedResult<V>, window: Duration) {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let _ = future.await;
            time::sleep(window).await;
            let mut entries = entries.lock();
            if entries.get(&key).map(|entry| entry.generation) == Some(generation) {
                entries.remove(&key);
            }
        });
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }
}

/// Coalesces concurrent executions sharing a key. The entry is evicted the
/// moment the execution settles.
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, SharedResult<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Display + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` unless an execution for `key` is already in flight, in which
    /// case wait for that one instead. `fut` runs on its own task, so it
    /// finishes (and evicts) even when every caller goes away.
    pub async fn run<Fut>(&self, key: K, fut: Fut) -> AaResult<V>
    where
        Fut: Future<Output = AaResult<V>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                debug!("Joining in-flight operation {}", key);
                existing.clone()
            } else {
                let map = Arc::clone(&self.inflight);
                let evict_key = key.clone();
                // The lock is held until the entry is inserted, so eviction
                // always happens after insertion.
                let handle = tokio::spawn(async move {
                    let out = fut.await;
                    map.lock().remove(&evict_key);
                    out
                });
                let shared = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(AaError::Internal(format!("operation task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                inflight.insert(key, shared.clone());
                shared
            }
        };
        shared.await
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().contains_key(key)
    }
}
