//! Request coalescing
//!
//! While a computation for a key is in flight, further callers for the same
//! key receive a clone of the same shared future instead of starting another
//! one. The entry is dropped once the computation finishes.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

pub type SharedResult<V> = Shared<BoxFuture<'static, V>>;

type InflightMap<K, V> = Arc<Mutex<HashMap<K, SharedResult<V>>>>;

pub struct SingleFlight<K, V> {
    inflight: InflightMap<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<K, V>(map: &InflightMap<K, V>) -> MutexGuard<'_, HashMap<K, SharedResult<V>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight computation for `key`, or start one with `make`.
    ///
    /// `make` is only invoked when no computation for `key` is running.
    pub fn run<F, Fut>(&self, key: K, make: F) -> SharedResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut inflight = lock(&self.inflight);
        if let Some(existing) = inflight.get(&key) {
            return existing.clone();
        }

        let registry = Arc::clone(&self.inflight);
        let cleanup_key = key.clone();
        let computation = make();
        let shared = async move {
            let value = computation.await;
            lock(&registry).remove(&cleanup_key);
            value
        }
        .boxed()
        .shared();

        inflight.insert(key, shared.clone());
        shared
    }

    /// Number of keys currently in flight
    pub fn len(&self) -> usize {
        lock(&self.inflight).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
