//! Relay error types.

/// Errors that end a relay run.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The broker could not be reached or rejected the credentials.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Gave up reconnecting after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
}
