//! Registry implementations for resolving package versions

pub mod cdn;
pub mod npm;

pub use cdn::CdnRegistry;
pub use npm::NpmRegistry;

pub(crate) const USER_AGENT: &str = concat!("version-resolve/", env!("CARGO_PKG_VERSION"));

/// Encode package name for URL (handles scoped packages)
pub fn encode_package_name(package_name: &str) -> String {
    if package_name.starts_with('@') {
        // Scoped package: @scope/name -> @scope%2Fname
        package_name.replace('/', "%2F")
    } else {
        package_name.to_string()
    }
}
