//! Error types for qoeprobe core

use thiserror::Error;

/// Result type alias for measurement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Measurement error types
#[derive(Error, Debug)]
pub enum Error {
    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Invalid manifest format: {0}")]
    InvalidManifest(String),

    // Request errors
    #[error("Request failed: {url}")]
    Request { url: String, source: reqwest::Error },

    #[error("Request to {url} returned HTTP {status}")]
    RequestStatus { url: String, status: u16 },

    // Session errors
    #[error("Measurement session closed")]
    SessionClosed,

    #[error("Unknown stream source: {0}")]
    UnknownSource(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Connection timeout")]
    ConnectionTimeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Persistence errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Request { .. }
                | Error::RequestStatus { .. }
                | Error::Network(_)
                | Error::ConnectionTimeout
        )
    }

    /// Returns the error code for diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::InvalidManifest(_) => "INVALID_MANIFEST",
            Error::Request { .. } => "REQUEST",
            Error::RequestStatus { .. } => "REQUEST_STATUS",
            Error::SessionClosed => "SESSION_CLOSED",
            Error::UnknownSource(_) => "UNKNOWN_SOURCE",
            Error::Network(_) => "NETWORK",
            Error::ConnectionTimeout => "TIMEOUT",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Io(_) => "IO",
            Error::Internal(_) => "INTERNAL",
        }
    }
}
