//! Registry test utilities

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tempfile::TempDir;

use version_resolve::config::CdnConfig;
use version_resolve::version::cache::CacheManager;
use version_resolve::version::error::SinkError;
use version_resolve::version::persistent::PersistentCache;
use version_resolve::version::registry::Registry;
use version_resolve::version::sink::ResolveSink;
use version_resolve::version::types::{PackageVersionData, ResolvedPackage};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Fallback registry serving fixed versions and recording every request
#[derive(Default)]
pub struct FakeRegistry {
    versions: HashMap<String, Vec<String>>,
    requests: Mutex<Vec<Vec<String>>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_versions(mut self, package: &str, versions: Vec<&str>) -> Self {
        self.versions.insert(
            package.to_string(),
            versions.into_iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn resolve_all(&self, package_names: &[String]) -> IndexMap<String, PackageVersionData> {
        self.requests.lock().unwrap().push(package_names.to_vec());

        package_names
            .iter()
            .map(|name| {
                let data = self
                    .versions
                    .get(name)
                    .map(|versions| PackageVersionData::from_versions(versions.clone()))
                    .unwrap_or_else(PackageVersionData::unknown);
                (name.clone(), data)
            })
            .collect()
    }
}

/// Sink recording every notification
#[derive(Default)]
pub struct RecordingSink {
    pub progress: Mutex<Vec<(String, usize, usize)>>,
    pub batches: Mutex<Vec<Vec<ResolvedPackage>>>,
}

impl ResolveSink for RecordingSink {
    fn on_progress(&self, name: &str, completed: usize, total: usize) -> Result<(), SinkError> {
        self.progress
            .lock()
            .unwrap()
            .push((name.to_string(), completed, total));
        Ok(())
    }

    fn on_batch_ready(&self, batch: Vec<ResolvedPackage>) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Create a cache manager over a fresh temporary directory
pub fn create_test_cache() -> (TempDir, Arc<CacheManager>) {
    let temp_dir = TempDir::new().unwrap();
    let cache = open_cache(temp_dir.path());
    (temp_dir, cache)
}

/// Open a new cache manager (empty memory tier) over an existing directory
pub fn open_cache(dir: &Path) -> Arc<CacheManager> {
    Arc::new(CacheManager::new(DAY, PersistentCache::new(dir, DAY, 100)))
}

/// CDN config with short timeouts suitable for tests
pub fn test_cdn_config(base_url: &str) -> CdnConfig {
    CdnConfig {
        base_url: base_url.to_string(),
        retry_timeouts: vec![500, 500],
        retry_delays: vec![10],
        ..CdnConfig::default()
    }
}

pub fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
