//! Transport error types

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// The executable is missing or could not be started
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// I/O error on the subprocess pipes
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was closed or the process exited
    #[error("Transport closed")]
    Closed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Process management error
    #[error("Process error: {0}")]
    Process(String),
}
