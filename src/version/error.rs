use std::time::Duration;

use thiserror::Error;

use crate::version::retry::RetryableError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache format version {found} does not match expected {expected}")]
    FormatMismatch { found: u32, expected: u32 },

    #[error("Cache file holds {found}, expected {expected}")]
    KeyMismatch { expected: String, found: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Retryable status {status}: retry after {retry_after:?}")]
    RetryableStatus {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Unexpected status: {0}")]
    UnexpectedStatus(u16),

    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid registry configuration: {0}")]
    Config(#[from] ConfigError),
}

impl RetryableError for RegistryError {
    fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Timeout(_) | RegistryError::RetryableStatus { .. } => true,
            RegistryError::Network(e) => is_transient(e),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RegistryError::RetryableStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Whether a reqwest error looks like a timeout or a transient network fault
/// (DNS failure, reset, refused, broken pipe).
pub fn is_transient(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() {
        return true;
    }

    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && is_transient_io_kind(io.kind())
        {
            return true;
        }
        if is_transient_message(&err.to_string()) {
            return true;
        }
        source = err.source();
    }

    false
}

pub(crate) fn is_transient_io_kind(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind;

    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
    )
}

pub(crate) fn is_transient_message(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "dns error",
        "failed to lookup address",
        "connection reset",
        "connection refused",
        "broken pipe",
        "timed out",
    ];

    let message = message.to_ascii_lowercase();
    MARKERS.iter().any(|marker| message.contains(marker))
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink receiver has been closed")]
    Closed,

    #[error("Sink rejected notification: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::ErrorKind;

    #[rstest]
    #[case(ErrorKind::ConnectionReset, true)]
    #[case(ErrorKind::ConnectionRefused, true)]
    #[case(ErrorKind::BrokenPipe, true)]
    #[case(ErrorKind::TimedOut, true)]
    #[case(ErrorKind::PermissionDenied, false)]
    #[case(ErrorKind::InvalidData, false)]
    fn is_transient_io_kind_returns_expected(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(is_transient_io_kind(kind), expected);
    }

    #[rstest]
    #[case("dns error: failed to lookup address information", true)]
    #[case("Connection reset by peer (os error 104)", true)]
    #[case("operation timed out", true)]
    #[case("invalid certificate", false)]
    fn is_transient_message_returns_expected(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_transient_message(message), expected);
    }

    #[rstest]
    #[case(RegistryError::Timeout(Duration::from_millis(10)), true)]
    #[case(RegistryError::RetryableStatus { status: 503, retry_after: None }, true)]
    #[case(RegistryError::UnexpectedStatus(404), false)]
    #[case(RegistryError::InvalidResponse("bad".to_string()), false)]
    fn registry_error_is_retryable_returns_expected(
        #[case] error: RegistryError,
        #[case] expected: bool,
    ) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn retry_after_is_exposed_only_for_retryable_status() {
        let error = RegistryError::RetryableStatus {
            status: 429,
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(error.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(RegistryError::Timeout(Duration::ZERO).retry_after(), None);
    }
}
