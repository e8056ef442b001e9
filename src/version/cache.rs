//! Two-tier version cache
//!
//! A short-lived in-memory map sits in front of the [`PersistentCache`]. The
//! memory tier is tuned for a single run, the disk tier for repeated runs on
//! the same day.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::version::persistent::{CacheStats, PersistentCache};
use crate::version::types::PackageVersionData;

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: PackageVersionData,
    stored_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManagerStats {
    pub memory_entries: usize,
    pub disk: CacheStats,
}

pub struct CacheManager {
    memory: Mutex<HashMap<String, MemoryEntry>>,
    memory_ttl: Duration,
    persistent: PersistentCache,
}

impl CacheManager {
    pub fn new(memory_ttl: Duration, persistent: PersistentCache) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            memory_ttl,
            persistent,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let persistent = PersistentCache::new(
            config.directory(),
            Duration::from_millis(config.disk_ttl),
            config.max_entries,
        );
        Self::new(Duration::from_millis(config.memory_ttl), persistent)
    }

    fn lock_memory(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_get(&self, key: &str) -> Option<PackageVersionData> {
        let mut memory = self.lock_memory();
        let entry = memory.get(key)?;
        if entry.stored_at.elapsed() < self.memory_ttl {
            return Some(entry.data.clone());
        }
        memory.remove(key);
        None
    }

    fn memory_set(&self, key: &str, data: PackageVersionData) {
        self.lock_memory().insert(
            key.to_string(),
            MemoryEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<PackageVersionData> {
        if let Some(data) = self.memory_get(key) {
            debug!("Memory cache hit for {}", key);
            return Some(data);
        }

        let data = self.persistent.get(key)?;
        debug!("Disk cache hit for {}", key);
        self.memory_set(key, data.clone());
        Some(data)
    }

    pub fn set(&self, key: &str, data: PackageVersionData) {
        self.persistent.set(key, &data);
        self.memory_set(key, data);
    }

    /// Read-through lookup: return the cached value, or run `fetcher` and
    /// cache what it produces. A `None` from the fetcher is not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetcher: F) -> Option<PackageVersionData>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<PackageVersionData>>,
    {
        if let Some(data) = self.get(key) {
            return Some(data);
        }

        let data = fetcher().await?;
        self.set(key, data.clone());
        Some(data)
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop the memory tier only. The disk tier is left untouched.
    pub fn clear(&self) {
        self.lock_memory().clear();
    }

    pub fn flush(&self) {
        self.persistent.flush();
    }

    pub fn persistent(&self) -> &PersistentCache {
        &self.persistent
    }

    pub fn stats(&self) -> CacheManagerStats {
        CacheManagerStats {
            memory_entries: self.lock_memory().len(),
            disk: self.persistent.get_stats(),
        }
    }
}
