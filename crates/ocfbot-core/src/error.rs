//! Error types for `ocfbot` core library.

use thiserror::Error;

/// Result type alias using `ocfbot` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `ocfbot` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed event payload
    #[error("Failed to decode event: {0}")]
    EventDecode(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
