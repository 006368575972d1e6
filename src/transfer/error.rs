//! Error types and failure classification for transfer operations.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while starting or driving a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Network-level error (DNS resolution, connection refused, TLS, etc.)
    #[error("network error transferring {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout transferring {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (429/503 responses).
        retry_after: Option<String>,
    },

    /// File system error while writing the artifact.
    #[error("IO error writing {path}: {source}")]
    Io {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The locator cannot be served by this backend.
    #[error("unsupported locator for this backend: {locator}")]
    UnsupportedLocator {
        /// Display form of the rejected locator.
        locator: String,
    },

    /// The stream ended short of the advertised byte count.
    #[error("truncated transfer from {url}: expected {expected} bytes, received {actual}")]
    Truncated {
        /// The source URL.
        url: String,
        /// Advertised total bytes.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The written artifact's hash does not match the catalog hash.
    ///
    /// The artifact is NOT deleted so the user can inspect it.
    #[error("integrity mismatch for {path}: expected {expected}, computed {actual}")]
    IntegrityMismatch {
        /// The written artifact.
        path: PathBuf,
        /// Expected digest (lowercase hex).
        expected: String,
        /// Computed digest (lowercase hex).
        actual: String,
    },

    /// The requested file does not exist inside the bundle.
    #[error("file {path} not present in bundle {locator}")]
    NotInBundle {
        /// Bundle locator.
        locator: String,
        /// Requested in-bundle path.
        path: String,
    },

    /// The peer-to-peer engine reported an error for this transfer.
    #[error("peer-to-peer engine error: {reason}")]
    Engine {
        /// Engine-reported cause.
        reason: String,
    },

    /// The peer-to-peer engine failed to initialize or is gone.
    #[error("peer-to-peer engine unavailable: {reason}")]
    EngineUnavailable {
        /// Why the engine is unavailable.
        reason: String,
    },
}

impl TransferError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::IntegrityMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an engine error.
    pub fn engine(reason: impl Into<String>) -> Self {
        Self::Engine {
            reason: reason.into(),
        }
    }

    /// Creates an engine-unavailable error.
    pub fn engine_unavailable(reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            reason: reason.into(),
        }
    }

    /// Returns the Retry-After header value carried by this error, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus { retry_after, .. } => retry_after.as_deref(),
            _ => None,
        }
    }
}

/// Classification of a transfer failure, retained on failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Network/timeout class; retried with backoff up to the cap.
    Transient,
    /// 4xx-class, unsupported locator, corrupt stream; never retried.
    Permanent,
    /// Post-download hash check failed; never retried, artifact kept.
    IntegrityMismatch,
    /// The peer-to-peer engine is unusable; that pool is down.
    EngineUnavailable,
}

impl FailureKind {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::IntegrityMismatch => "integrity-mismatch",
            Self::EngineUnavailable => "engine-unavailable",
        }
    }

    /// Returns true when a retry could help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "permanent" => Ok(Self::Permanent),
            "integrity-mismatch" => Ok(Self::IntegrityMismatch),
            "engine-unavailable" => Ok(Self::EngineUnavailable),
            _ => Err(format!("invalid failure kind: {s}")),
        }
    }
}

/// Classifies a transfer error for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Kind | Rationale |
/// |--------|------|-----------|
/// | 400 | Permanent | Bad request - won't succeed on retry |
/// | 401 | Permanent | Unauthorized - no auth flow for providers |
/// | 403 | Permanent | Forbidden |
/// | 404 | Permanent | Not found |
/// | 408 | Transient | Request timeout - may succeed |
/// | 410 | Permanent | Gone |
/// | 429 | Transient | Rate limited - Retry-After honored upstream |
/// | 5xx | Transient | Server-side, may recover |
#[must_use]
pub fn classify(error: &TransferError) -> FailureKind {
    match error {
        TransferError::HttpStatus { status, .. } => classify_http_status(*status),

        TransferError::Timeout { .. } => FailureKind::Transient,

        TransferError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            }
        }

        // Engine hiccups (tracker timeouts, swarm stalls) are worth retrying.
        TransferError::Engine { .. } => FailureKind::Transient,

        TransferError::IntegrityMismatch { .. } => FailureKind::IntegrityMismatch,

        TransferError::EngineUnavailable { .. } => FailureKind::EngineUnavailable,

        TransferError::ClientBuild(_)
        | TransferError::Io { .. }
        | TransferError::UnsupportedLocator { .. }
        | TransferError::Truncated { .. }
        | TransferError::NotInBundle { .. } => FailureKind::Permanent,
    }
}

/// Classifies an HTTP status code into a failure kind.
#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureKind {
    match status {
        400 => FailureKind::Permanent,
        401 => FailureKind::Permanent,
        403 => FailureKind::Permanent,
        404 => FailureKind::Permanent,
        408 => FailureKind::Transient,
        410 => FailureKind::Permanent,
        429 => FailureKind::Transient,
        451 => FailureKind::Permanent,

        status if (500..600).contains(&status) => FailureKind::Transient,
        status if (400..500).contains(&status) => FailureKind::Permanent,

        _ => FailureKind::Permanent,
    }
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
