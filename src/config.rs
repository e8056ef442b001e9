use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::version::error::ConfigError;
use crate::version::retry::RetryPolicy;

const APP_NAME: &str = "version-resolve";

// =============================================================================
// Time-related constants
// =============================================================================

/// Default in-memory cache TTL in milliseconds (5 minutes)
pub const DEFAULT_MEMORY_TTL_MS: u64 = 5 * 60 * 1000;

/// Default disk cache TTL in milliseconds (24 hours)
pub const DEFAULT_DISK_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Timeout for authoritative registry requests in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

/// Per-attempt timeouts for CDN requests in milliseconds
pub const DEFAULT_RETRY_TIMEOUTS_MS: &[u64] = &[3_000, 6_000];

/// Delays between CDN attempts in milliseconds
pub const DEFAULT_RETRY_DELAYS_MS: &[u64] = &[300];

/// Idle keep-alive for pooled CDN connections in milliseconds
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 10_000;

/// Flush buffered results after this long without reaching [`BATCH_SIZE`]
pub const BATCH_IDLE_TIMEOUT_MS: u64 = 500;

// =============================================================================
// Size-related constants
// =============================================================================

/// Number of results buffered before a batch notification
pub const BATCH_SIZE: usize = 5;

pub const DEFAULT_MAX_DISK_ENTRIES: usize = 5_000;

pub const DEFAULT_POOL_CONNECTIONS: usize = 32;

pub const DEFAULT_CDN_URL: &str = "https://cdn.jsdelivr.net/npm";

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

pub const DEFAULT_MANIFEST_PATH: &str = "package.json";

/// Top-level resolver configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    pub source: ResolutionSource,
    pub cdn: CdnConfig,
    pub registry: RegistryConfig,
    pub cache: CacheConfig,
}

/// Which source answers first
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// CDN mirror with fallback to the registry
    #[default]
    Cdn,
    /// Registry only
    Registry,
}

/// CDN mirror configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CdnConfig {
    pub base_url: String,
    pub manifest_path: String,
    /// Per-attempt timeouts in milliseconds; the number of entries is the attempt count
    pub retry_timeouts: Vec<u64>,
    /// Delays between attempts in milliseconds
    pub retry_delays: Vec<u64>,
    pub pool_connections: usize,
    /// Idle keep-alive in milliseconds
    pub keep_alive: u64,
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CDN_URL.to_string(),
            manifest_path: DEFAULT_MANIFEST_PATH.to_string(),
            retry_timeouts: DEFAULT_RETRY_TIMEOUTS_MS.to_vec(),
            retry_delays: DEFAULT_RETRY_DELAYS_MS.to_vec(),
            pool_connections: DEFAULT_POOL_CONNECTIONS,
            keep_alive: DEFAULT_KEEP_ALIVE_MS,
        }
    }
}

impl CdnConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        RetryPolicy::new(
            self.retry_timeouts
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            self.retry_delays
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}

/// Authoritative registry configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REGISTRY_URL.to_string(),
            timeout: FETCH_TIMEOUT_MS,
        }
    }
}

/// Cache-related configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// In-memory TTL in milliseconds
    pub memory_ttl: u64,
    /// Disk TTL in milliseconds
    pub disk_ttl: u64,
    pub max_entries: usize,
    /// Overrides the platform cache directory
    pub directory: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ttl: DEFAULT_MEMORY_TTL_MS,
            disk_ttl: DEFAULT_DISK_TTL_MS,
            max_entries: DEFAULT_MAX_DISK_ENTRIES,
            directory: None,
        }
    }
}

impl CacheConfig {
    pub fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| cache_dir().join("versions"))
    }
}

impl ResolverConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cdn.retry_timeouts.is_empty() {
            return Err(ConfigError::Invalid(
                "cdn.retryTimeouts must not be empty".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.maxEntries must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the cache directory for version-resolve.
/// Uses $XDG_CACHE_HOME/version-resolve if XDG_CACHE_HOME is set,
/// otherwise the platform cache directory,
/// or ./version-resolve if neither is available.
pub fn cache_dir() -> PathBuf {
    cache_dir_with_env(std::env::var("XDG_CACHE_HOME").ok(), dirs::cache_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    cache_dir().join("version-resolve.log")
}

fn cache_dir_with_env(xdg_cache_home: Option<String>, platform_cache: Option<PathBuf>) -> PathBuf {
    let cache_dir = xdg_cache_home
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or(platform_cache)
        .unwrap_or_else(|| PathBuf::from("."));

    cache_dir.join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolver_config_from_partial_object_uses_defaults_for_missing_fields() {
        let result = serde_json::from_value::<ResolverConfig>(json!({
            "cache": {
                "memoryTtl": 1000
            }
        }))
        .unwrap();

        assert_eq!(result.cache.memory_ttl, 1000);
        assert_eq!(result.cache.disk_ttl, DEFAULT_DISK_TTL_MS);
        assert_eq!(result.cdn, CdnConfig::default());
        assert_eq!(result.source, ResolutionSource::Cdn);
    }

    #[test]
    fn resolver_config_from_full_object_parses_all_fields() {
        let result = serde_json::from_value::<ResolverConfig>(json!({
            "source": "registry",
            "cdn": {
                "baseUrl": "http://cdn.local",
                "manifestPath": "manifest.json",
                "retryTimeouts": [100, 200],
                "retryDelays": [10],
                "poolConnections": 4,
                "keepAlive": 500
            },
            "registry": {
                "baseUrl": "http://registry.local",
                "timeout": 1000
            },
            "cache": {
                "memoryTtl": 1,
                "diskTtl": 2,
                "maxEntries": 3,
                "directory": "/tmp/versions"
            }
        }))
        .unwrap();

        assert_eq!(
            result,
            ResolverConfig {
                source: ResolutionSource::Registry,
                cdn: CdnConfig {
                    base_url: "http://cdn.local".to_string(),
                    manifest_path: "manifest.json".to_string(),
                    retry_timeouts: vec![100, 200],
                    retry_delays: vec![10],
                    pool_connections: 4,
                    keep_alive: 500,
                },
                registry: RegistryConfig {
                    base_url: "http://registry.local".to_string(),
                    timeout: 1000,
                },
                cache: CacheConfig {
                    memory_ttl: 1,
                    disk_ttl: 2,
                    max_entries: 3,
                    directory: Some(PathBuf::from("/tmp/versions")),
                },
            }
        );
    }

    #[test]
    fn from_json_str_rejects_empty_retry_timeouts() {
        let result = ResolverConfig::from_json_str(r#"{"cdn": {"retryTimeouts": []}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_json_str_rejects_malformed_json() {
        let result = ResolverConfig::from_json_str("{");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn retry_policy_uses_configured_attempts() {
        let policy = CdnConfig::default().retry_policy().unwrap();

        assert_eq!(policy.attempts(), DEFAULT_RETRY_TIMEOUTS_MS.len());
        assert_eq!(policy.shortest_timeout(), Duration::from_millis(3_000));
    }

    #[test]
    fn cache_directory_override_takes_precedence() {
        let config = CacheConfig {
            directory: Some(PathBuf::from("/tmp/custom")),
            ..CacheConfig::default()
        };
        assert_eq!(config.directory(), PathBuf::from("/tmp/custom"));
    }

    #[test]
    fn cache_dir_with_env_uses_xdg_cache_home_when_set() {
        let path = cache_dir_with_env(
            Some("/tmp/test-cache".to_string()),
            Some(PathBuf::from("/home/user/.cache")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-cache/version-resolve"));
    }

    #[test]
    fn cache_dir_with_env_falls_back_to_platform_cache() {
        let path = cache_dir_with_env(None, Some(PathBuf::from("/home/user/.cache")));

        assert_eq!(path, PathBuf::from("/home/user/.cache/version-resolve"));
    }

    #[test]
    fn cache_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = cache_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./version-resolve"));
    }
}
