use std::time::Duration;
use thiserror::Error;

/// Result type for room control operations
pub type Result<T> = std::result::Result<T, RoomError>;

/// Errors that can occur when talking to room devices
#[derive(Error, Debug)]
pub enum RoomError {
    /// Transport-level failure to reach a device
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// `host:port` that was dialled
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed banner, frame or response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown input source, bus name or preset
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No reply within the allotted budget
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Mixer code outside the table range
    #[error("Code {0} out of range [0, 400]")]
    OutOfRange(i32),

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RoomError {
    /// Whether this error is a reply/handshake timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, RoomError::Timeout(_))
    }
}
