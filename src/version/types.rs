//! Resolved package version data

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::version::semver::{
    CompareResult, calculate_latest_major, calculate_latest_minor, compare_descending,
    compare_versions, identity, satisfies,
};

/// Latest-version sentinel for packages no source could resolve
pub const UNKNOWN_VERSION: &str = "unknown";

/// What is known about one package's versions.
///
/// `all_versions` is ordered newest first and, when non-empty, always starts
/// with `latest_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageVersionData {
    pub latest_version: String,
    pub all_versions: Vec<String>,
}

impl PackageVersionData {
    pub fn unknown() -> Self {
        Self {
            latest_version: UNKNOWN_VERSION.to_string(),
            all_versions: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.latest_version == UNKNOWN_VERSION
    }

    /// Build from an unordered version list: newest first, deduplicated by
    /// identity. Entries without an identity are dropped; an empty result
    /// yields the `unknown` sentinel.
    pub fn from_versions<I>(versions: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = HashSet::new();
        let mut versions: Vec<String> = versions
            .into_iter()
            .filter(|v| identity(v).is_some_and(|id| seen.insert(id)))
            .collect();
        versions.sort_by(|a, b| compare_descending(a, b));

        match versions.first() {
            Some(latest) => Self {
                latest_version: latest.clone(),
                all_versions: versions,
            },
            None => Self::unknown(),
        }
    }

    /// Merge `candidates` around a known `latest`.
    ///
    /// Candidates are deduplicated by identity and sorted newest first, and
    /// the literal `latest` string always occupies position 0. A latest value
    /// with no identity is placed first without merging.
    pub fn compose<I>(latest: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let latest_id = identity(latest);
        let mut seen = HashSet::new();
        if let Some(id) = &latest_id {
            seen.insert(id.clone());
        }

        let mut rest: Vec<String> = candidates
            .into_iter()
            .filter(|v| v != latest)
            .filter(|v| identity(v).is_some_and(|id| seen.insert(id)))
            .collect();
        rest.sort_by(|a, b| compare_descending(a, b));

        let mut all_versions = Vec::with_capacity(rest.len() + 1);
        all_versions.push(latest.to_string());
        all_versions.extend(rest);

        Self {
            latest_version: latest.to_string(),
            all_versions,
        }
    }

    /// Whether `current` is behind `latest_version`. Unresolved packages are
    /// never outdated.
    pub fn is_outdated(&self, current: &str) -> bool {
        !self.is_unknown()
            && compare_versions(current, &self.latest_version) == CompareResult::Outdated
    }

    /// Candidate upgrade targets relative to a current specifier.
    pub fn upgrade_targets(&self, current: &str) -> UpgradeTargets {
        if self.is_unknown() {
            return UpgradeTargets::default();
        }

        let in_range = self
            .all_versions
            .iter()
            .filter(|v| satisfies(v, current))
            .find(|v| compare_versions(current, v) == CompareResult::Outdated)
            .cloned();

        UpgradeTargets {
            in_range,
            same_major: calculate_latest_minor(current, &self.all_versions),
            latest: calculate_latest_major(current, &self.all_versions),
        }
    }
}

/// Upgrade choices offered for one package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTargets {
    /// Newest known version still satisfying the current range
    pub in_range: Option<String>,
    /// Newest known version within the current major
    pub same_major: Option<String>,
    /// Newest known version overall
    pub latest: Option<String>,
}

/// One completed resolution, as delivered to batch sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPackage {
    pub name: String,
    pub data: PackageVersionData,
}
