//! npm registry API implementation
//!
//! The authoritative source: one full package document per package, from
//! which every strict release is kept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use indexmap::IndexMap;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RegistryConfig;
use crate::version::batch::resolve_batch;
use crate::version::cache::CacheManager;
use crate::version::error::RegistryError;
use crate::version::registries::{USER_AGENT, encode_package_name};
use crate::version::registry::Registry;
use crate::version::semver::is_strict_release;
use crate::version::sink::{NoopSink, ResolveSink};
use crate::version::types::PackageVersionData;

/// Response from npm registry API
#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    versions: HashMap<String, serde_json::Value>,
}

struct NpmClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    cache: Arc<CacheManager>,
}

/// Registry implementation for npm registry API
pub struct NpmRegistry {
    inner: Arc<NpmClient>,
}

impl NpmRegistry {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        cache: Arc<CacheManager>,
    ) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            inner: Arc::new(NpmClient {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                timeout,
                cache,
            }),
        })
    }

    pub fn from_config(
        config: &RegistryConfig,
        cache: Arc<CacheManager>,
    ) -> Result<Self, RegistryError> {
        Self::new(
            &config.base_url,
            Duration::from_millis(config.timeout),
            cache,
        )
    }

    /// Resolve every package, reporting to `sink`, then persist the cache index.
    pub async fn resolve_all_with_sink(
        &self,
        package_names: &[String],
        sink: &dyn ResolveSink,
    ) -> IndexMap<String, PackageVersionData> {
        let results = self.resolve(package_names, sink).await;
        self.inner.cache.flush();
        results
    }

    async fn resolve(
        &self,
        package_names: &[String],
        sink: &dyn ResolveSink,
    ) -> IndexMap<String, PackageVersionData> {
        resolve_batch(package_names, sink, |name| {
            let inner = Arc::clone(&self.inner);
            let name = name.to_string();
            async move { inner.resolve_package(&name).await }.boxed()
        })
        .await
    }
}

impl NpmClient {
    async fn resolve_package(&self, package_name: &str) -> PackageVersionData {
        self.cache
            .get_or_fetch(package_name, || async {
                let data = match self.fetch_versions(package_name).await {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Failed to resolve {} from npm registry: {}", package_name, e);
                        PackageVersionData::unknown()
                    }
                };
                Some(data)
            })
            .await
            .unwrap_or_else(PackageVersionData::unknown)
    }

    async fn fetch_versions(
        &self,
        package_name: &str,
    ) -> Result<PackageVersionData, RegistryError> {
        let url = format!("{}/{}", self.base_url, encode_package_name(package_name));
        debug!("Fetching {}", url);

        // Dropping the request future on timeout cancels it
        let package_info = tokio::time::timeout(self.timeout, self.request(&url, package_name))
            .await
            .map_err(|_| RegistryError::Timeout(self.timeout))??;

        let data = PackageVersionData::from_versions(
            package_info
                .versions
                .into_keys()
                .filter(|v| is_strict_release(v)),
        );
        if data.is_unknown() {
            debug!("No release versions published for {}", package_name);
        }
        Ok(data)
    }

    async fn request(
        &self,
        url: &str,
        package_name: &str,
    ) -> Result<NpmPackageResponse, RegistryError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(package_name.to_string()));
        }

        if !status.is_success() {
            return Err(RegistryError::UnexpectedStatus(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Registry for NpmRegistry {
    async fn resolve_all(&self, package_names: &[String]) -> IndexMap<String, PackageVersionData> {
        self.resolve(package_names, &NoopSink).await
    }
}
