//! Error types for fedkit
//!
//! All failures surfaced by the federation core are converted to
//! `FederationError`. Translating errors into protocol responses is the
//! embedding server's job; this crate only defines the taxonomy.

use thiserror::Error;

/// Federation-core error type
///
/// Parsing and mandatory-fetch errors terminate the calling flow's
/// success path. Optional page fetches never surface here: they degrade
/// to partial results (see `fetch::PageFetch`).
#[derive(Debug, Error)]
pub enum FederationError {
    /// Malformed handle local part; rejected locally, never retried
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Non-success status on a mandatory remote fetch
    #[error("Remote fetch of {url} returned HTTP {status}")]
    RemoteFetch { url: String, status: u16 },

    /// WebFinger or actor lookup yielded nothing
    ///
    /// Distinct from transport failure: the remote answered, it just has
    /// no matching record.
    #[error("Actor not found")]
    ActorNotFound,

    /// Signed POST to an inbox did not complete successfully
    #[error("Delivery to {inbox} failed: {reason}")]
    Delivery {
        inbox: String,
        /// HTTP status when the inbox answered with a non-2xx
        status: Option<u16>,
        reason: String,
    },

    /// Fetch or delivery target rejected before any request was made
    /// (loopback, private-range, or link-local destination)
    #[error("Forbidden federation target: {0}")]
    ForbiddenTarget(String),

    /// Transport-level HTTP client failure (DNS, connect, timeout)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Malformed URL or request component
    #[error("Validation error: {0}")]
    Validation(String),

    /// Signing key material could not be parsed or used
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    /// KEK decryption/encryption of stored key material failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for FederationError {
    fn from(err: config::ConfigError) -> Self {
        FederationError::Config(err.to_string())
    }
}

impl FederationError {
    /// Stable label for the error metric
    pub fn metric_label(&self) -> &'static str {
        match self {
            FederationError::InvalidHandle(_) => "invalid_handle",
            FederationError::RemoteFetch { .. } => "remote_fetch",
            FederationError::ActorNotFound => "actor_not_found",
            FederationError::Delivery { .. } => "delivery",
            FederationError::ForbiddenTarget(_) => "forbidden_target",
            FederationError::HttpClient(_) => "http_client",
            FederationError::Validation(_) => "validation",
            FederationError::InvalidKey(_) => "invalid_key",
            FederationError::Encryption(_) => "encryption",
            FederationError::Config(_) => "config",
            FederationError::Internal(_) => "internal",
        }
    }
}

/// Result type alias using FederationError
pub type Result<T> = std::result::Result<T, FederationError>;
