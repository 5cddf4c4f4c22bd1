//! Error types for Crawlbridge.

use thiserror::Error;

/// Result type alias using the Crawlbridge error.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Crawlbridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client bridge error (transport, protocol, tool calls)
    #[error("Client error: {0}")]
    Client(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
