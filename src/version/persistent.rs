//! Disk-backed version cache
//!
//! Layout under the cache directory:
//!
//! ```text
//! index.json          {"formatVersion": 1, "entries": {"<name>": {"file": "...", "timestamp": ...}}}
//! <safe-name>.json    {"packageName": "...", "latestVersion": "...", "allVersions": [...], "timestamp": ...}
//! ```
//!
//! Every disk failure degrades to a cache miss. Nothing here returns an error
//! to the caller. Only files this cache wrote are ever deleted: data files are
//! recognized by their index entry or by their own `packageName` record.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::version::error::CacheError;
use crate::version::types::PackageVersionData;

/// Bump whenever the on-disk layout changes; older caches are discarded on load.
pub const CACHE_FORMAT_VERSION: u32 = 2;

const INDEX_FILE: &str = "index.json";

/// Fraction of capacity evicted when the cache is full
const EVICTION_DIVISOR: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheIndex {
    format_version: u32,
    #[serde(default)]
    entries: HashMap<String, IndexEntry>,
}

impl CacheIndex {
    fn empty() -> Self {
        Self {
            format_version: CACHE_FORMAT_VERSION,
            entries: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    package_name: String,
    latest_version: String,
    all_versions: Vec<String>,
    timestamp: i64,
}

#[derive(Debug)]
struct IndexState {
    index: CacheIndex,
    loaded: bool,
    dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub storage_location: PathBuf,
}

pub struct PersistentCache {
    dir: PathBuf,
    ttl: Duration,
    max_entries: usize,
    state: Mutex<IndexState>,
}

/// Map a package name to a file name that is safe on every platform.
///
/// `@scope/name` becomes `scope__name`.
pub fn cache_file_name(package_name: &str) -> String {
    let unscoped = package_name.strip_prefix('@').unwrap_or(package_name);
    let safe: String = unscoped
        .replace('/', "__")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}.json")
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

/// Get current timestamp in milliseconds since UNIX epoch
fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl PersistentCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            max_entries: max_entries.max(1),
            state: Mutex::new(IndexState {
                index: CacheIndex::empty(),
                loaded: false,
                dirty: false,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn is_expired(&self, timestamp: i64) -> bool {
        let age_ms = current_timestamp_ms().saturating_sub(timestamp);
        age_ms > self.ttl.as_millis() as i64
    }

    fn ensure_loaded(&self, state: &mut IndexState) {
        if state.loaded {
            return;
        }
        state.loaded = true;

        match self.read_index() {
            Ok(Some(index)) if index.format_version == CACHE_FORMAT_VERSION => {
                debug!("Loaded cache index with {} entries", index.entries.len());
                state.index = index;
            }
            Ok(Some(index)) => {
                let e = CacheError::FormatMismatch {
                    found: index.format_version,
                    expected: CACHE_FORMAT_VERSION,
                };
                info!("Discarding disk cache at {:?}: {}", self.dir, e);
                // The stale entries still name the files to delete
                state.index = index;
                self.clear_locked(state);
            }
            Ok(None) => {
                state.index = CacheIndex::empty();
            }
            Err(e) => {
                info!("Discarding disk cache at {:?}: {}", self.dir, e);
                state.index = CacheIndex::empty();
                self.clear_locked(state);
            }
        }
    }

    fn read_index(&self) -> Result<Option<CacheIndex>, CacheError> {
        let content = match fs::read_to_string(self.index_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_index(&self, index: &CacheIndex) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_vec(index)?;
        let tmp_path = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, self.index_path())?;
        Ok(())
    }

    fn read_data(&self, key: &str, file: &str) -> Result<PackageVersionData, CacheError> {
        let content = fs::read_to_string(self.dir.join(file))?;
        let cached: CacheFile = serde_json::from_str(&content)?;
        if cached.package_name != key {
            return Err(CacheError::KeyMismatch {
                expected: key.to_string(),
                found: cached.package_name,
            });
        }
        Ok(PackageVersionData {
            latest_version: cached.latest_version,
            all_versions: cached.all_versions,
        })
    }

    fn write_data(
        &self,
        key: &str,
        file: &str,
        data: &PackageVersionData,
        timestamp: i64,
    ) -> Result<(), CacheError> {
        let cached = CacheFile {
            package_name: key.to_string(),
            latest_version: data.latest_version.clone(),
            all_versions: data.all_versions.clone(),
            timestamp,
        };
        fs::write(self.dir.join(file), serde_json::to_vec(&cached)?)?;
        Ok(())
    }

    fn remove_file(&self, file: &str) {
        if let Err(e) = fs::remove_file(self.dir.join(file))
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!("Failed to remove cache file {}: {}", file, e);
        }
    }

    /// Drop the index entry for `key` and, if the entry points at the file
    /// this cache would write for `key`, delete that file too.
    fn remove_entry(&self, state: &mut IndexState, key: &str) {
        if let Some(entry) = state.index.entries.remove(key) {
            if entry.file == cache_file_name(key) {
                self.remove_file(&entry.file);
            }
            state.dirty = true;
        }
    }

    /// Whether `path` holds a data file written by this cache.
    fn is_own_data_file(path: &Path) -> bool {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<CacheFile>(&content).ok())
            .is_some_and(|cached| cache_file_name(&cached.package_name) == file_name(path))
    }

    fn evict_oldest(&self, state: &mut IndexState) {
        let count = self.max_entries.div_ceil(EVICTION_DIVISOR).max(1);

        let mut by_age: Vec<(String, i64)> = state
            .index
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.timestamp))
            .collect();
        by_age.sort_by_key(|(_, timestamp)| *timestamp);

        debug!("Evicting {} oldest cache entries", count);
        for (key, _) in by_age.into_iter().take(count) {
            self.remove_entry(state, &key);
        }
    }

    fn clear_locked(&self, state: &mut IndexState) {
        for (key, entry) in &state.index.entries {
            if entry.file == cache_file_name(key) {
                self.remove_file(&entry.file);
            }
        }

        // Orphans left behind by an unreadable index
        if let Ok(dir) = fs::read_dir(&self.dir) {
            for entry in dir.flatten() {
                let path = entry.path();
                let candidate = path.extension().is_some_and(|ext| ext == "json")
                    && file_name(&path) != INDEX_FILE;
                if candidate
                    && Self::is_own_data_file(&path)
                    && let Err(e) = fs::remove_file(&path)
                {
                    debug!("Failed to remove cache file {:?}: {}", path, e);
                }
            }
        }

        state.index = CacheIndex::empty();
        state.loaded = true;
        state.dirty = false;

        if let Err(e) = self.write_index(&state.index) {
            warn!("Failed to write empty cache index to {:?}: {}", self.dir, e);
        }
    }

    /// Look up a package. Expired or unreadable entries are removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<PackageVersionData> {
        let mut state = self.lock_state();
        self.ensure_loaded(&mut state);

        let entry = state.index.entries.get(key)?.clone();

        if self.is_expired(entry.timestamp) {
            debug!("Disk cache entry for {} expired", key);
            self.remove_entry(&mut state, key);
            return None;
        }

        match self.read_data(key, &entry.file) {
            Ok(data) => Some(data),
            Err(e @ CacheError::KeyMismatch { .. }) => {
                debug!("Dropping cache entry for {}: {}", key, e);
                state.index.entries.remove(key);
                state.dirty = true;
                None
            }
            Err(e) => {
                debug!("Dropping unreadable cache entry for {}: {}", key, e);
                self.remove_entry(&mut state, key);
                None
            }
        }
    }

    /// Store a package. The index is only written on [`flush`](Self::flush).
    pub fn set(&self, key: &str, data: &PackageVersionData) {
        let mut state = self.lock_state();
        self.ensure_loaded(&mut state);

        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create cache directory {:?}: {}", self.dir, e);
            return;
        }

        if !state.index.entries.contains_key(key) && state.index.entries.len() >= self.max_entries
        {
            self.evict_oldest(&mut state);
        }

        let file = cache_file_name(key);
        let timestamp = current_timestamp_ms();
        if let Err(e) = self.write_data(key, &file, data, timestamp) {
            warn!("Failed to write cache entry for {}: {}", key, e);
            return;
        }

        // `@a/b` and `a__b` share a file name; the last writer owns it
        let before = state.index.entries.len();
        state
            .index
            .entries
            .retain(|other, entry| other == key || entry.file != file);
        if state.index.entries.len() != before {
            debug!("Cache file {} taken over by {}", file, key);
        }

        state
            .index
            .entries
            .insert(key.to_string(), IndexEntry { file, timestamp });
        state.dirty = true;
    }

    pub fn get_many(&self, keys: &[String]) -> HashMap<String, PackageVersionData> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|data| (key.clone(), data)))
            .collect()
    }

    pub fn set_many(&self, entries: &HashMap<String, PackageVersionData>) {
        for (key, data) in entries {
            self.set(key, data);
        }
        self.flush();
    }

    /// Persist the index if it changed since the last flush.
    pub fn flush(&self) {
        let mut state = self.lock_state();
        if !state.dirty {
            return;
        }

        match self.write_index(&state.index) {
            Ok(()) => {
                state.dirty = false;
                debug!(
                    "Flushed cache index with {} entries",
                    state.index.entries.len()
                );
            }
            Err(e) => warn!("Failed to flush cache index to {:?}: {}", self.dir, e),
        }
    }

    /// Delete every cached entry and reset the index.
    pub fn clear_cache(&self) {
        let mut state = self.lock_state();
        self.ensure_loaded(&mut state);
        self.clear_locked(&mut state);
        info!("Cleared disk cache at {:?}", self.dir);
    }

    pub fn get_stats(&self) -> CacheStats {
        let mut state = self.lock_state();
        self.ensure_loaded(&mut state);
        CacheStats {
            entries: state.index.entries.len(),
            storage_location: self.dir.clone(),
        }
    }
}

impl Drop for PersistentCache {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn data(latest: &str) -> PackageVersionData {
        PackageVersionData {
            latest_version: latest.to_string(),
            all_versions: vec![latest.to_string()],
        }
    }

    #[rstest]
    #[case("lodash", "lodash.json")]
    #[case("@types/node", "types__node.json")]
    #[case("@babel/plugin-transform", "babel__plugin-transform.json")]
    #[case("weird:name", "weird_name.json")]
    fn cache_file_name_returns_expected(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(cache_file_name(name), expected);
    }

    #[test]
    fn set_then_get_returns_data() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.set("@types/node", &data("20.0.0"));

        assert_eq!(cache.get("@types/node"), Some(data("20.0.0")));
        assert!(temp_dir.path().join("types__node.json").exists());
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn flushed_entries_survive_new_instance() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = PersistentCache::new(temp_dir.path(), DAY, 100);
            cache.set("x", &data("1.0.0"));
            cache.flush();
        }

        let reopened = PersistentCache::new(temp_dir.path(), DAY, 100);
        assert_eq!(reopened.get("x"), Some(data("1.0.0")));
    }

    #[test]
    fn expired_entry_is_absent_and_removed_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), Duration::from_millis(20), 100);

        cache.set("axios", &data("1.0.0"));
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(cache.get("axios"), None);
        assert!(!temp_dir.path().join("axios.json").exists());
        assert_eq!(cache.get_stats().entries, 0);
    }

    #[test]
    fn corrupted_data_file_is_treated_as_miss_and_purged() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.set("axios", &data("1.0.0"));
        fs::write(temp_dir.path().join("axios.json"), "{not json").unwrap();

        assert_eq!(cache.get("axios"), None);
        assert_eq!(cache.get_stats().entries, 0);
    }

    #[test]
    fn missing_data_file_is_treated_as_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.set("axios", &data("1.0.0"));
        fs::remove_file(temp_dir.path().join("axios.json")).unwrap();

        assert_eq!(cache.get("axios"), None);
    }

    #[test]
    fn corrupted_index_is_discarded_with_its_orphans() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(INDEX_FILE), "garbage").unwrap();
        fs::write(
            temp_dir.path().join("types__node.json"),
            r#"{"packageName":"@types/node","latestVersion":"1.0.0","allVersions":["1.0.0"],"timestamp":0}"#,
        )
        .unwrap();

        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        assert_eq!(cache.get_stats().entries, 0);
        assert!(!temp_dir.path().join("types__node.json").exists());
    }

    #[rstest]
    #[case("package.json", r#"{"name":"my-app","version":"1.0.0"}"#)]
    #[case("tsconfig.json", "{}")]
    #[case("notes.json", "not json at all")]
    // Valid data record, but for a package that would not be stored under this name
    #[case(
        "renamed.json",
        r#"{"packageName":"lodash","latestVersion":"1.0.0","allVersions":[],"timestamp":0}"#
    )]
    fn discarding_index_keeps_foreign_json_files(#[case] file: &str, #[case] content: &str) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(INDEX_FILE), "{corrupt").unwrap();
        fs::write(temp_dir.path().join(file), content).unwrap();

        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);
        cache.clear_cache();

        assert_eq!(cache.get_stats().entries, 0);
        assert_eq!(
            fs::read_to_string(temp_dir.path().join(file)).unwrap(),
            content
        );
    }

    #[test]
    fn clear_cache_only_deletes_files_it_wrote() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = r#"{"name":"my-app","dependencies":{"react":"^18.0.0"}}"#;
        fs::write(temp_dir.path().join("package.json"), manifest).unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.set("react", &data("18.2.0"));
        cache.clear_cache();

        assert!(!temp_dir.path().join("react.json").exists());
        assert_eq!(
            fs::read_to_string(temp_dir.path().join("package.json")).unwrap(),
            manifest
        );
    }

    #[test]
    fn colliding_file_names_never_return_other_package() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.set("@a/b", &data("1.0.0"));
        cache.set("a__b", &data("9.9.9"));

        assert_eq!(cache.get("@a/b"), None);
        assert_eq!(cache.get("a__b"), Some(data("9.9.9")));
        assert_eq!(cache.get_stats().entries, 1);
    }

    #[test]
    fn data_file_for_another_package_is_a_miss_and_kept() {
        let temp_dir = TempDir::new().unwrap();
        {
            let cache = PersistentCache::new(temp_dir.path(), DAY, 100);
            cache.set("@a/b", &data("1.0.0"));
            cache.flush();
        }
        // Another writer took the shared file without updating this index
        fs::write(
            temp_dir.path().join("a__b.json"),
            r#"{"packageName":"a__b","latestVersion":"9.9.9","allVersions":["9.9.9"],"timestamp":0}"#,
        )
        .unwrap();

        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        assert_eq!(cache.get("@a/b"), None);
        assert_eq!(cache.get_stats().entries, 0);
        assert!(temp_dir.path().join("a__b.json").exists());
    }

    #[test]
    fn index_with_old_format_version_invalidates_cache() {
        let temp_dir = TempDir::new().unwrap();
        let old_index = serde_json::json!({
            "formatVersion": CACHE_FORMAT_VERSION + 100,
            "entries": {
                "x": {"file": "x.json", "timestamp": current_timestamp_ms()}
            }
        });
        fs::write(temp_dir.path().join(INDEX_FILE), old_index.to_string()).unwrap();
        fs::write(
            temp_dir.path().join("x.json"),
            r#"{"latestVersion":"1.0.0","allVersions":["1.0.0"],"timestamp":0}"#,
        )
        .unwrap();

        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        assert_eq!(cache.get("x"), None);
        assert_eq!(cache.get_stats().entries, 0);
        assert!(!temp_dir.path().join("x.json").exists());
    }

    #[test]
    fn set_evicts_oldest_tenth_when_full() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 10);

        for i in 0..10 {
            cache.set(&format!("pkg-{i}"), &data("1.0.0"));
            // distinct timestamps so eviction order is deterministic
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.set("pkg-new", &data("1.0.0"));

        assert_eq!(cache.get_stats().entries, 10);
        assert_eq!(cache.get("pkg-0"), None);
        assert!(cache.get("pkg-1").is_some());
        assert!(cache.get("pkg-new").is_some());
    }

    #[test]
    fn set_existing_key_does_not_evict() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 2);

        cache.set("a", &data("1.0.0"));
        cache.set("b", &data("1.0.0"));
        cache.set("a", &data("2.0.0"));

        assert_eq!(cache.get("a"), Some(data("2.0.0")));
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn clear_cache_removes_all_entries() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.set("a", &data("1.0.0"));
        cache.set("@scope/b", &data("1.0.0"));
        cache.flush();
        cache.clear_cache();

        assert_eq!(cache.get_stats().entries, 0);
        assert!(!temp_dir.path().join("a.json").exists());
        assert!(!temp_dir.path().join("scope__b.json").exists());
        assert!(temp_dir.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn set_many_flushes_index_once() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        let entries = HashMap::from([
            ("a".to_string(), data("1.0.0")),
            ("b".to_string(), data("2.0.0")),
        ]);
        cache.set_many(&entries);

        let index: CacheIndex =
            serde_json::from_str(&fs::read_to_string(temp_dir.path().join(INDEX_FILE)).unwrap())
                .unwrap();
        assert_eq!(index.entries.len(), 2);

        let found = cache.get_many(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], data("2.0.0"));
    }

    #[test]
    fn flush_without_changes_does_not_write_index() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);

        cache.flush();

        assert!(!temp_dir.path().join(INDEX_FILE).exists());
    }

    #[test]
    fn get_stats_reports_location() {
        let temp_dir = TempDir::new().unwrap();
        let cache = PersistentCache::new(temp_dir.path(), DAY, 100);
        cache.set("a", &data("1.0.0"));

        assert_eq!(
            cache.get_stats(),
            CacheStats {
                entries: 1,
                storage_location: temp_dir.path().to_path_buf(),
            }
        );
    }
}
