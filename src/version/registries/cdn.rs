//! CDN mirror client
//!
//! Serves the manifest of a package at a version tag
//! (`{base}/{name}@{tag}/{manifest}`). Only the `latest` tag and, when the
//! installed major lags behind, that major's tag are fetched. Packages the
//! CDN cannot answer are delegated to a fallback [`Registry`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use tracing::{debug, info, warn};

use crate::config::CdnConfig;
use crate::version::batch::resolve_batch;
use crate::version::cache::CacheManager;
use crate::version::error::RegistryError;
use crate::version::registries::{USER_AGENT, encode_package_name};
use crate::version::registry::Registry;
use crate::version::retry::RetryPolicy;
use crate::version::semver::major;
use crate::version::sink::ResolveSink;
use crate::version::types::PackageVersionData;

const LATEST_TAG: &str = "latest";

struct CdnClient {
    client: RwLock<Option<reqwest::Client>>,
    base_url: String,
    manifest_path: String,
    policy: RetryPolicy,
    cache: Arc<CacheManager>,
    fallback: Arc<dyn Registry>,
}

pub struct CdnRegistry {
    inner: Arc<CdnClient>,
}

/// 408, 429 and every 5xx are worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Parse a `Retry-After` value given as delta-seconds or an HTTP-date.
///
/// Dates in the past yield `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    (date.with_timezone(&Utc) - now).to_std().ok()
}

/// Extract a non-empty `version` string from a manifest body.
fn parse_manifest_version(body: &[u8]) -> Option<String> {
    let manifest: serde_json::Value = serde_json::from_slice(body).ok()?;
    let version = manifest.get("version")?.as_str()?.trim();
    (!version.is_empty()).then(|| version.to_string())
}

impl CdnRegistry {
    pub fn new(
        config: &CdnConfig,
        cache: Arc<CacheManager>,
        fallback: Arc<dyn Registry>,
    ) -> Result<Self, RegistryError> {
        let policy = config.retry_policy()?;
        let keep_alive = Duration::from_millis(config.keep_alive);

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(policy.shortest_timeout())
            .pool_max_idle_per_host(config.pool_connections)
            .pool_idle_timeout(keep_alive)
            .tcp_keepalive(keep_alive)
            .build()?;

        Ok(Self {
            inner: Arc::new(CdnClient {
                client: RwLock::new(Some(client)),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                manifest_path: config.manifest_path.trim_start_matches('/').to_string(),
                policy,
                cache,
                fallback,
            }),
        })
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.inner.cache
    }

    pub fn tag_url(&self, package_name: &str, tag: &str) -> String {
        self.inner.tag_url(package_name, tag)
    }

    /// Fetch the version published under `tag`, retrying transient failures.
    ///
    /// Returns `None` when the tag does not exist, the response carries no
    /// usable version, or every attempt failed.
    pub async fn fetch_tag(&self, package_name: &str, tag: &str) -> Option<String> {
        self.inner.fetch_tag(package_name, tag).await
    }

    /// Resolve every package, reporting to `sink`, then persist the cache index.
    ///
    /// `current_versions` maps package names to installed specifiers and
    /// decides whether the installed major's tag is fetched too.
    pub async fn resolve_all(
        &self,
        package_names: &[String],
        current_versions: Option<&HashMap<String, String>>,
        sink: &dyn ResolveSink,
    ) -> IndexMap<String, PackageVersionData> {
        let results = resolve_batch(package_names, sink, |name| {
            let inner = Arc::clone(&self.inner);
            let current = current_versions.and_then(|versions| versions.get(name)).cloned();
            let name = name.to_string();
            async move { inner.resolve_package(&name, current.as_deref()).await }.boxed()
        })
        .await;

        self.inner.cache.flush();
        results
    }

    /// Drop the pooled HTTP client. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        let closed = self
            .inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if closed {
            info!("Closed CDN connection pool");
        }
        closed
    }
}

impl CdnClient {
    fn tag_url(&self, package_name: &str, tag: &str) -> String {
        format!(
            "{}/{}@{}/{}",
            self.base_url,
            encode_package_name(package_name),
            tag,
            self.manifest_path
        )
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn resolve_package(
        &self,
        package_name: &str,
        current: Option<&str>,
    ) -> PackageVersionData {
        self.cache
            .get_or_fetch(package_name, || async {
                Some(self.fetch_package(package_name, current).await)
            })
            .await
            .unwrap_or_else(PackageVersionData::unknown)
    }

    async fn fetch_package(
        &self,
        package_name: &str,
        current: Option<&str>,
    ) -> PackageVersionData {
        let Some(latest) = self.fetch_tag(package_name, LATEST_TAG).await else {
            debug!("CDN has no latest for {}, using fallback registry", package_name);
            return self
                .fallback
                .resolve_all(&[package_name.to_string()])
                .await
                .swap_remove(package_name)
                .unwrap_or_else(PackageVersionData::unknown);
        };

        let mut candidates = Vec::new();
        if let Some(current_major) = current.and_then(major)
            && major(&latest) != Some(current_major)
            && let Some(version) = self
                .fetch_tag(package_name, &current_major.to_string())
                .await
        {
            candidates.push(version);
        }

        PackageVersionData::compose(&latest, candidates)
    }

    async fn fetch_tag(&self, package_name: &str, tag: &str) -> Option<String> {
        let Some(client) = self.client() else {
            debug!("CDN client closed, skipping {}@{}", package_name, tag);
            return None;
        };
        let url = self.tag_url(package_name, tag);

        let result = self
            .policy
            .run(|_, timeout| Self::attempt(&client, &url, timeout))
            .await;

        match result {
            Ok(version) => version,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                None
            }
        }
    }

    /// One request with `timeout` applied to the header wait and again to the body read.
    async fn attempt(
        client: &reqwest::Client,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<String>, RegistryError> {
        let response = tokio::time::timeout(
            timeout,
            client.get(url).header(ACCEPT, "application/json").send(),
        )
        .await
        .map_err(|_| RegistryError::Timeout(timeout))??;

        let status = response.status();

        if status == StatusCode::OK {
            let body = tokio::time::timeout(timeout, response.bytes())
                .await
                .map_err(|_| RegistryError::Timeout(timeout))??;
            let version = parse_manifest_version(&body);
            if version.is_none() {
                debug!("No version in manifest at {}", url);
            }
            return Ok(version);
        }

        if is_retryable_status(status) {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, Utc::now()));
            // Drain so the connection can be reused
            let _ = tokio::time::timeout(timeout, response.bytes()).await;
            return Err(RegistryError::RetryableStatus {
                status: status.as_u16(),
                retry_after,
            });
        }

        debug!("CDN returned status {} for {}", status, url);
        Ok(None)
    }
}
