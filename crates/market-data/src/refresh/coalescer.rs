//! Per-key request coalescing.
//!
//! At most one upstream fetch per key is outstanding at a time. The fetch runs
//! on its own task; every caller that arrives while it is pending awaits the
//! same shared result. The slot is released by a guard owned by the task, so it
//! is freed on completion, on panic and on abort alike.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use tokio::task::AbortHandle;

use crate::errors::{MarketDataError, Result};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

struct InFlight<V> {
    generation: u64,
    result: SharedFetch<V>,
    abort: AbortHandle,
}

type InFlightMap<K, V> = HashMap<K, InFlight<V>>;

/// Merges concurrent requests for the same key into one upstream call.
pub struct RequestCoalescer<K, V> {
    in_flight: Arc<Mutex<InFlightMap<K, V>>>,
    generation: AtomicU64,
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `fetch` for `key` unless a fetch for `key` is already pending, in
    /// which case wait for that one instead. `fetch` is only invoked when this
    /// caller starts a new fetch.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn run_exclusive<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let pending = {
            let mut in_flight = lock_map(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!("Coalescer: joining in-flight fetch for {:?}", key);
                    existing.result.clone()
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let guard = SlotGuard {
                        key: key.clone(),
                        generation,
                        in_flight: Arc::clone(&self.in_flight),
                    };
                    let work = fetch();
                    // The map lock is held across spawn; the guard's release
                    // blocks on it, so the insert below always happens first.
                    let task = tokio::spawn(async move {
                        let _guard = guard;
                        work.await
                    });
                    let abort = task.abort_handle();
                    let key_label = format!("{:?}", key);
                    let result = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(join_error) if join_error.is_cancelled() => Err(
                                MarketDataError::Cancelled(format!("fetch for {} aborted", key_label)),
                            ),
                            Err(join_error) => Err(MarketDataError::Cancelled(format!(
                                "fetch for {} panicked: {}",
                                key_label, join_error
                            ))),
                        }
                    }
                    .boxed()
                    .shared();

                    debug!("Coalescer: starting fetch for {:?}", key);
                    in_flight.insert(
                        key,
                        InFlight {
                            generation,
                            result: result.clone(),
                            abort,
                        },
                    );
                    result
                }
            }
        };

        pending.await
    }

    /// Whether a fetch for `key` is currently outstanding.
    pub fn is_in_flight(&self, key: &K) -> bool {
        lock_map(&self.in_flight).contains_key(key)
    }

    /// Number of keys with an outstanding fetch.
    pub fn in_flight_count(&self) -> usize {
        lock_map(&self.in_flight).len()
    }

    /// Abandon every outstanding fetch and release all slots.
    ///
    /// Waiters receive [`MarketDataError::Cancelled`]. The slots are free when
    /// this returns; guards of the aborted tasks find a stale generation and
    /// leave later fetches alone.
    pub fn cancel_all(&self) -> usize {
        let mut in_flight = lock_map(&self.in_flight);
        let aborted = in_flight.len();
        for (key, pending) in in_flight.drain() {
            debug!("Coalescer: aborting in-flight fetch for {:?}", key);
            pending.abort.abort();
        }
        aborted
    }
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Lock the in-flight map, recovering from poison if necessary.
///
/// A poisoned map only means a panic elsewhere while it was held; the map
/// itself is always consistent between statements.
fn lock_map<K, V>(map: &Mutex<InFlightMap<K, V>>) -> MutexGuard<'_, InFlightMap<K, V>> {
    map.lock().unwrap_or_else(|poisoned| {
        warn!("Coalescer mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Releases a key's slot when the fetch task finishes or is dropped.
struct SlotGuard<K: Eq + Hash, V> {
    key: K,
    generation: u64,
    in_flight: Arc<Mutex<InFlightMap<K, V>>>,
}

impl<K: Eq + Hash, V> Drop for SlotGuard<K, V> {
    fn drop(&mut self) {
        let mut in_flight = lock_map(&self.in_flight);
        if in_flight
            .get(&self.key)
            .is_some_and(|pending| pending.generation == self.generation)
        {
            in_flight.remove(&self.key);
        }
    }
}
