//! Bounded, request-coalescing result cache.
//!
//! Finished values live in an LRU keyed by the caller's raw key. While a
//! value is being computed its shared future sits in an in-flight table, so
//! concurrent callers for the same key wait on one computation instead of
//! starting their own.

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, Instrument};

type Flight<V, E> = Shared<BoxFuture<'static, Result<Arc<V>, Arc<E>>>>;

/// Counters reported by `/health`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined a computation already in flight
    pub coalesced: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

struct CacheState<V, E> {
    entries: LruCache<String, Arc<V>>,
    in_flight: HashMap<String, Flight<V, E>>,
    stats: CacheStats,
}

pub struct CoalescingCache<V, E> {
    state: Arc<Mutex<CacheState<V, E>>>,
}

impl<V, E> Clone for CoalescingCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V, E> CoalescingCache<V, E>
where
    V: Send + Sync + 'static,
    E: From<JoinError> + Send + Sync + 'static,
{
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                in_flight: HashMap::new(),
                stats: CacheStats {
                    capacity: capacity.get(),
                    ..CacheStats::default()
                },
            })),
        }
    }

    /// Cached value for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            len: state.entries.len(),
            ..state.stats.clone()
        }
    }

    /// Return the cached value or compute it, at most once at a time per key.
    ///
    /// `compute` is only called when neither a cached value nor an in-flight
    /// computation exists. Its future runs as its own task, so it completes
    /// and populates the cache even if every caller stops waiting. Errors are
    /// handed to every waiter and never cached.
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: &str, compute: F) -> Result<Arc<V>, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let flight = {
            let mut state = self.state.lock();
            if let Some(hit) = state.entries.get(key).cloned() {
                state.stats.hits += 1;
                debug!(key, "cache hit");
                return Ok(hit);
            }

            if let Some(flight) = state.in_flight.get(key).cloned() {
                state.stats.coalesced += 1;
                debug!(key, "joining in-flight computation");
                flight
            } else {
                state.stats.misses += 1;
                debug!(key, "cache miss");
                let flight = self.spawn_flight(key.to_string(), compute());
                state.in_flight.insert(key.to_string(), flight.clone());
                flight
            }
        };

        flight.await
    }

    fn spawn_flight<Fut>(&self, key: String, computation: Fut) -> Flight<V, E>
    where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(
            async move {
                let _guard = FlightGuard {
                    state: Arc::clone(&state),
                    key: key.clone(),
                };
                let outcome = computation.await.map(Arc::new).map_err(Arc::new);
                if let Ok(value) = &outcome {
                    let mut state = state.lock();
                    if let Some((evicted, _)) = state.entries.push(key.clone(), Arc::clone(value)) {
                        if evicted != key {
                            state.stats.evictions += 1;
                            debug!(evicted = %evicted, "evicted least recently used entry");
                        }
                    }
                }
                outcome
            }
            .in_current_span(),
        );

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(Arc::new(E::from(join_error))),
            }
        }
        .boxed()
        .shared()
    }
}

/// Clears the in-flight marker when the computation task ends, even by panic.
struct FlightGuard<V, E> {
    state: Arc<Mutex<CacheState<V, E>>>,
    key: String,
}

impl<V, E> Drop for FlightGuard<V, E> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.key);
    }
}
