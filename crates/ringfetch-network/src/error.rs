//! Error types for stream operations

use ringfetch_core::BufferError;
use thiserror::Error;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while streaming a remote file
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// Ring buffer rejected an operation
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Origin answered with an HTTP error
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Origin answered a range request with something other than 206
    #[error("Unexpected status {status}: expected 206 Partial Content")]
    UnexpectedStatus { status: u16 },

    /// Network failure while connecting or reading the body
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out at the transport level
    #[error("Request timeout after {0}ms")]
    RequestTimeout(u64),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport could not be built
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Waiting for a position took longer than allowed
    #[error("Timed out after {duration_ms}ms waiting for position {position}")]
    Timeout { position: u64, duration_ms: u64 },

    /// The active transfer stopped before reaching the requested position
    #[error("Transfer ended at position {position}")]
    TransferEnded { position: u64 },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Stream or factory already closed
    #[error("Stream closed")]
    Closed,

    /// Stream URL could not be resolved for a node
    #[error("Failed to resolve stream URL for node {node}: {message}")]
    Resolve { node: String, message: String },
}

impl StreamError {
    /// Whether a later read may succeed without any outside intervention
    pub fn is_transient(&self) -> bool {
        match self {
            StreamError::Network(_)
            | StreamError::RequestTimeout(_)
            | StreamError::Timeout { .. }
            | StreamError::TransferEnded { .. } => true,
            StreamError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Expected shutdown signals, not worth reporting
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            StreamError::Cancelled | StreamError::Closed | StreamError::Buffer(BufferError::Closed)
        )
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            StreamError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            StreamError::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for StreamError {
    fn from(e: url::ParseError) -> Self {
        StreamError::InvalidUrl(e.to_string())
    }
}
