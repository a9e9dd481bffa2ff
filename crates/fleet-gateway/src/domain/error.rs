//! Error types for the gateway core.

use thiserror::Error;

/// Errors surfaced by a homebase link to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The wait queue is at capacity; the request was never accepted.
    #[error("request queue full")]
    QueueFull,

    /// The per-request deadline expired before a response arrived.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The remote executed the request and reported failure.
    #[error("{0}")]
    Remote(String),

    /// The link went down while the request was queued or in flight.
    #[error("link closed")]
    LinkClosed,

    /// The supervisor task is gone; the registry will restart it.
    #[error("link unavailable")]
    Unavailable,
}

/// Service-level errors (not recoverable by a link's own state machine).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Store connection or query error
    #[error("store error: {0}")]
    Store(String),

    /// Address rejected by the allow-list
    #[error("address not allowed: {0}")]
    AddressNotAllowed(String),
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        GatewayError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        assert_eq!(LinkError::QueueFull.to_string(), "request queue full");
        assert_eq!(
            LinkError::Timeout(10_000).to_string(),
            "request timed out after 10000 ms"
        );
        assert_eq!(
            LinkError::Remote("bad script".into()).to_string(),
            "bad script"
        );
    }
}
