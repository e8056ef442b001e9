use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::{Version, VersionReq};

static COERCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d])(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("valid coerce regex")
});

static STRICT_RELEASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid release regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
    Latest,
    Outdated,
    Newer,
    Invalid,
}

/// Parse a version string into a semver::Version, normalizing partial versions.
///
/// Handles partial versions like "1" or "1.2" by padding with zeros.
/// Does NOT strip 'v' prefix.
///
/// Examples:
/// - "1" -> Version(1, 0, 0)
/// - "1.2" -> Version(1, 2, 0)
/// - "1.2.3" -> Version(1, 2, 3)
pub fn parse_version(version: &str) -> Option<Version> {
    let parts: Vec<&str> = version.split('.').collect();
    let normalized = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => version.to_string(),
    };
    Version::parse(&normalized).ok()
}

/// Extract the first `major[.minor[.patch]]` found in `input`.
///
/// Mirrors npm's `semver.coerce`: `"^1.2"` -> 1.2.0, `"v3"` -> 3.0.0,
/// `">=2.1.4 <3"` -> 2.1.4. Pre-release and build suffixes are dropped.
pub fn coerce(input: &str) -> Option<Version> {
    let captures = COERCE_RE.captures(input)?;
    let part = |i: usize| -> Option<u64> {
        match captures.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    Some(Version::new(part(1)?, part(2)?, part(3)?))
}

/// Normalized identity of a version string, used for deduplication.
///
/// Exact semver (padded when partial) wins so pre-releases keep their identity;
/// anything else is coerced.
pub fn identity(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);
    parse_version(stripped).or_else(|| coerce(trimmed))
}

/// Major version of a version or range specifier, if one can be determined.
pub fn major(version: &str) -> Option<u64> {
    identity(version).map(|v| v.major)
}

/// Whether `version` is a plain `major.minor.patch` release with no
/// pre-release or build metadata.
pub fn is_strict_release(version: &str) -> bool {
    STRICT_RELEASE_RE.is_match(version) && Version::parse(version).is_ok()
}

/// Ordering for sorting newest first. Versions without an identity sort last.
pub fn compare_descending(a: &str, b: &str) -> Ordering {
    match (identity(a), identity(b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Compare a current version specifier against the latest version.
pub fn compare_versions(current: &str, latest: &str) -> CompareResult {
    let (Some(current), Some(latest)) = (coerce(current), identity(latest)) else {
        return CompareResult::Invalid;
    };

    match current.cmp(&latest) {
        Ordering::Less => CompareResult::Outdated,
        Ordering::Equal => CompareResult::Latest,
        Ordering::Greater => CompareResult::Newer,
    }
}

/// Check whether `version` satisfies an npm-style range.
///
/// Supports `||` alternatives, space-separated comparator sets, hyphen ranges,
/// `x`/`*` wildcards, and exact versions (which npm treats as `=`).
pub fn satisfies(version: &str, range: &str) -> bool {
    let Some(version) = identity(version) else {
        return false;
    };

    let range = range.trim();
    if range.is_empty() || range == "*" || range == "latest" {
        return true;
    }

    range
        .split("||")
        .filter_map(to_version_req)
        .any(|req| req.matches(&version))
}

fn to_version_req(part: &str) -> Option<VersionReq> {
    let part = part.trim();
    if part.is_empty() {
        return None;
    }

    let comparators: Vec<String> = match part.split_once(" - ") {
        Some((from, to)) => vec![format!(">={}", from.trim()), format!("<={}", to.trim())],
        None => part
            .split_whitespace()
            .map(|token| {
                let is_bare = token.starts_with(|c: char| c.is_ascii_digit())
                    && !token.contains(['x', 'X', '*']);
                if is_bare {
                    format!("={token}")
                } else {
                    token.to_string()
                }
            })
            .collect(),
    };

    VersionReq::parse(&comparators.join(", ")).ok()
}

/// Calculate the latest minor version within the same major
///
/// Returns the latest minor.patch version if a newer minor exists,
/// or None if the current version is already the latest minor.
pub fn calculate_latest_minor(
    current_version: &str,
    available_versions: &[String],
) -> Option<String> {
    let current = coerce(current_version)?;

    let (original, latest_minor) = available_versions
        .iter()
        .filter_map(|v| identity(v).map(|parsed| (v, parsed)))
        .filter(|(_, v)| v.major == current.major)
        .max_by(|(_, a), (_, b)| a.cmp(b))?;

    if latest_minor > current {
        Some(original.clone())
    } else {
        None
    }
}

/// Calculate the latest major version
///
/// Returns the latest version if a newer major version exists,
/// or None if the current version is already the latest.
pub fn calculate_latest_major(
    current_version: &str,
    available_versions: &[String],
) -> Option<String> {
    let current = coerce(current_version)?;

    let (original, latest) = available_versions
        .iter()
        .filter_map(|v| identity(v).map(|parsed| (v, parsed)))
        .max_by(|(_, a), (_, b)| a.cmp(b))?;

    if latest > current {
        Some(original.clone())
    } else {
        None
    }
}
