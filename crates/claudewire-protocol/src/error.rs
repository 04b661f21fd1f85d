//! Error types for protocol operations

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while decoding or encoding protocol frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The line is not a JSON object or has the wrong shape
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A control envelope is missing a required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
