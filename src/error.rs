//! Error types for the subscriber client

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for subscriber client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error surfaced synchronously at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A lookup address could not be parsed into a usable URL
    #[error("Invalid lookup address {addr}: {reason}")]
    InvalidLookupAddress {
        /// The address as supplied by the caller
        addr: String,
        /// Why it was rejected
        reason: String,
    },

    /// Discovery query failed for one source (non-fatal, per cycle)
    #[error("Lookup failed for {host}: {reason}")]
    LookupFailed {
        /// Normalized base URL of the failing source
        host: String,
        /// Reason for the failure
        reason: String,
    },

    /// Connection establishment failed
    #[error("Connection failed for {endpoint}: {reason}")]
    ConnectionFailed {
        /// The producer endpoint that failed to connect
        endpoint: Endpoint,
        /// Reason for the failure
        reason: String,
    },

    /// Connection establishment or handshake exceeded the configured timeout
    #[error("Connection timeout for {endpoint} after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The producer endpoint that timed out
        endpoint: Endpoint,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Consecutive reconnect attempts exhausted, connection dropped
    #[error("Maximum reconnection attempts ({max_attempts}) exceeded for {endpoint}")]
    MaxReconnectAttemptsExceeded {
        /// The producer endpoint that failed to reconnect
        endpoint: Endpoint,
        /// Maximum attempts that were tried
        max_attempts: u32,
    },

    /// Producer sent a frame the client cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Producer reported an error frame
    #[error("Producer error: {0}")]
    Producer(String),

    /// JSON error in a lookup response or handshake payload
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// HTTP error from a discovery query
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during network operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Check if this error is recoverable through retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::LookupFailed { .. }
                | ClientError::ConnectionFailed { .. }
                | ClientError::ConnectionTimeout { .. }
                | ClientError::Protocol(_)
                | ClientError::Producer(_)
                | ClientError::Http(_)
                | ClientError::Io(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ClientError::Configuration(_)
                | ClientError::InvalidLookupAddress { .. }
                | ClientError::MaxReconnectAttemptsExceeded { .. }
        )
    }
}
