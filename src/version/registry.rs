//! Registry trait for resolving package versions from a remote source

use indexmap::IndexMap;
#[cfg(test)]
use mockall::automock;

use crate::version::types::PackageVersionData;

/// A source able to resolve version data for a list of packages
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Resolves every package in `package_names`
    ///
    /// # Returns
    /// A map keyed in input order covering every requested name. Packages that
    /// could not be resolved map to [`PackageVersionData::unknown`].
    async fn resolve_all(&self, package_names: &[String]) -> IndexMap<String, PackageVersionData>;
}
