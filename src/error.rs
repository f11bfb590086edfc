use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Unified error type for the Detour request layer
#[derive(Error, Debug)]
pub enum DetourError {
    // Endpoint errors
    #[error("Invalid proxy endpoint '{0}': expected host:port or host:port:username:password")]
    InvalidEndpoint(String),

    #[error("No proxy endpoints available")]
    NoEndpointsAvailable,

    // Dispatch errors (one attempt against one endpoint, or one direct dispatch)
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(StatusCode),

    // Aggregate failure of a whole logical request
    #[error(
        "All {attempts} proxied attempts and the direct fallback failed \
         (last proxy error: {proxy_error}; direct error: {direct_error})"
    )]
    Exhausted {
        attempts: u32,
        proxy_error: Box<DetourError>,
        direct_error: Box<DetourError>,
    },

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for Detour operations
pub type Result<T> = std::result::Result<T, DetourError>;

impl DetourError {
    /// Check if this error came from a timed-out dispatch
    pub fn is_timeout(&self) -> bool {
        matches!(self, DetourError::Timeout(_))
    }
}

// Convert from I/O errors raised by the file-backed store
impl From<std::io::Error> for DetourError {
    fn from(err: std::io::Error) -> Self {
        DetourError::Storage(err.to_string())
    }
}

// Convert from serialization errors raised while persisting state
impl From<serde_json::Error> for DetourError {
    fn from(err: serde_json::Error) -> Self {
        DetourError::Storage(err.to_string())
    }
}
