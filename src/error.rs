//! Error types for the parcel access layer

use thiserror::Error;

/// Result type alias for parcel operations
pub type Result<T> = std::result::Result<T, DhlError>;

/// Main error type for the DHL MCP server.
///
/// Every failure a tool or resource can surface is one of these variants;
/// `kind()` gives the stable machine-readable name clients can branch on.
#[derive(Error, Debug)]
pub enum DhlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Carrier unavailable: {0}")]
    Transient(String),

    #[error("Parcel not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Carrier error: {0}")]
    Carrier(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network-level failures (timeout, refused connect) are worth another try;
/// decode and builder errors are not
fn transient_http(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

impl DhlError {
    /// Check if the error is worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            DhlError::Transient(_) => true,
            DhlError::Http(e) => transient_http(e),
            _ => false,
        }
    }

    /// Check if the error should trigger a re-login
    pub fn is_auth(&self) -> bool {
        matches!(self, DhlError::Auth(_))
    }

    /// Stable machine-readable kind, surfaced in tool and resource errors
    pub fn kind(&self) -> &'static str {
        match self {
            DhlError::Config(_) => "config",
            DhlError::Auth(_) => "auth",
            DhlError::Transient(_) => "transient",
            DhlError::Http(e) if transient_http(e) => "transient",
            DhlError::NotFound(_) => "not_found",
            DhlError::Validation(_) => "validation",
            _ => "internal",
        }
    }

    /// Get error code for MCP protocol
    pub fn code(&self) -> i64 {
        match self {
            DhlError::NotFound(_) => -32001,
            DhlError::Validation(_) => -32602,
            DhlError::Auth(_) => -32003,
            DhlError::Transient(_) => -32004,
            DhlError::Http(e) if transient_http(e) => -32004,
            _ => -32000,
        }
    }
}
