//! Broker client error types.

use redis::{ErrorKind, RedisError};

/// Errors that can occur talking to the broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error reply.
    #[error("Server error: {0}")]
    Server(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Whether the connection that produced this error can still be used.
    pub const fn connection_reusable(&self) -> bool {
        matches!(self, Self::Server(_))
    }
}

impl From<RedisError> for BrokerError {
    fn from(e: RedisError) -> Self {
        match e.kind() {
            ErrorKind::AuthenticationFailed => Self::Auth(e.to_string()),
            ErrorKind::InvalidClientConfig => Self::InvalidUrl(e.to_string()),
            ErrorKind::TypeError => Self::Protocol(e.to_string()),
            _ if e.is_io_error()
                || e.is_connection_dropped()
                || e.is_connection_refusal()
                || e.is_timeout() =>
            {
                Self::Connection(e.to_string())
            }
            _ => Self::Server(e.to_string()),
        }
    }
}
