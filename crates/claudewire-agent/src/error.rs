//! Error types for the agent runtime
//!
//! Errors implement [`ErrorRecovery`], which tells callers whether retrying makes
//! sense and what to do next.

use crate::mcp::sdk::SdkToolError;
use claudewire_protocol::ProtocolError;
use claudewire_transport::TransportError;
use thiserror::Error;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Error recovery guidance trait
pub trait ErrorRecovery {
    /// Whether this error should be retried
    fn is_retriable(&self) -> bool;

    /// User-facing action to take
    fn suggested_action(&self) -> &'static str;
}

/// Errors that can occur in agent operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// The CLI executable is missing or could not be started
    #[error("Failed to spawn CLI: {0}")]
    Spawn(String),

    /// A line could not be decoded
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(String),

    /// No callback is registered under the requested id
    #[error("Hook callback not found: {0}")]
    CallbackNotFound(String),

    /// A callback did not finish within its timeout
    #[error("Callback {callback_id} timed out after {timeout_ms} ms")]
    CallbackTimeout {
        /// Callback (or request) that timed out
        callback_id: String,
        /// The applied timeout
        timeout_ms: u64,
    },

    /// A callback returned an error or panicked
    #[error("Callback failed: {0}")]
    CallbackExecution(String),

    /// The in-process tool server has no such tool
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// An in-process tool failed
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The client has not completed its handshake
    #[error("Not connected: handshake has not completed")]
    NotConnected,

    /// The CLI process exited or the client was stopped
    #[error("Disconnected from CLI")]
    Disconnected,

    /// The `initialize` handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The CLI answered a control request with an error
    #[error("Control request failed: {0}")]
    Control(String),

    /// The CLI reported an error result for the turn
    #[error("Turn failed: {0}")]
    TurnFailed(String),

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure other than a closed channel
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<TransportError> for AgentError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Spawn { .. } => Self::Spawn(err.to_string()),
            TransportError::Closed => Self::Disconnected,
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<ProtocolError> for AgentError {
    fn from(err: ProtocolError) -> Self {
        Self::ProtocolDecode(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolDecode(err.to_string())
    }
}

impl From<SdkToolError> for AgentError {
    fn from(err: SdkToolError) -> Self {
        match err {
            SdkToolError::NotFound { tool, server } => {
                Self::ToolNotFound(format!("'{}' in server '{}'", tool, server))
            }
            SdkToolError::ExecutionFailed(reason) => Self::ToolExecution(reason),
            other => Self::ToolExecution(other.to_string()),
        }
    }
}

impl ErrorRecovery for AgentError {
    fn is_retriable(&self) -> bool {
        match self {
            // A fresh client may succeed once the process is back
            Self::Disconnected | Self::Transport(_) | Self::Timeout(_) => true,
            Self::CallbackTimeout { .. } => true,
            Self::NotConnected => true,
            _ => false,
        }
    }

    fn suggested_action(&self) -> &'static str {
        match self {
            Self::Spawn(_) => {
                "CLI could not be started. Check that it is installed \
                or set CLAUDEWIRE_CLI_PATH."
            }
            Self::ProtocolDecode(_) => {
                "CLI sent a line that could not be decoded. Check that \
                the CLI version speaks stream-json."
            }
            Self::CallbackNotFound(_) => {
                "CLI referenced an unknown hook callback. Reconnect so \
                hooks are registered again."
            }
            Self::CallbackTimeout { .. } => {
                "Hook callback timed out. Optimize hook logic \
                or raise the matcher timeout."
            }
            Self::CallbackExecution(_) => {
                "Hook callback failed. Check hook implementation \
                for errors."
            }
            Self::ToolNotFound(_) => "Tool is not registered on the SDK server.",
            Self::ToolExecution(_) => "Tool failed. Check the tool implementation.",
            Self::NotConnected => "Wait for the client to finish connecting before sending.",
            Self::Disconnected => {
                "Connection lost. Create a new client and check \
                CLI stderr for the cause."
            }
            Self::HandshakeFailed(_) => {
                "CLI rejected the initialize request. Check hook \
                configuration and CLI version."
            }
            Self::Control(_) => "CLI rejected the control request.",
            Self::TurnFailed(_) => "The turn ended with an error result. Inspect the message.",
            Self::Timeout(_) => "Request timed out. Try again or raise the timeout.",
            Self::Config(_) => "Fix the configuration and create a new client.",
            Self::Transport(_) => "Transport error detected. Check process logs for details.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_conversion() {
        let spawn = TransportError::Spawn {
            program: "claude".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(matches!(AgentError::from(spawn), AgentError::Spawn(_)));
        assert_eq!(AgentError::from(TransportError::Closed), AgentError::Disconnected);
    }

    #[test]
    fn test_sdk_tool_error_conversion() {
        let missing = SdkToolError::NotFound {
            tool: "sqrt".to_string(),
            server: "calc".to_string(),
        };
        assert_eq!(
            AgentError::from(missing).to_string(),
            "Tool not found: 'sqrt' in server 'calc'"
        );
        assert_eq!(
            AgentError::from(SdkToolError::ExecutionFailed("division by zero".to_string())),
            AgentError::ToolExecution("division by zero".to_string())
        );
        assert!(matches!(
            AgentError::from(SdkToolError::InvalidInput("missing field `a`".to_string())),
            AgentError::ToolExecution(ref msg) if msg == "Invalid input: missing field `a`"
        ));
    }

    #[test]
    fn test_retriable() {
        assert!(AgentError::Disconnected.is_retriable());
        assert!(!AgentError::HandshakeFailed("bad".to_string()).is_retriable());
        assert!(!AgentError::Config("x".to_string()).is_retriable());
    }

    #[test]
    fn test_timeout_message() {
        let err = AgentError::CallbackTimeout {
            callback_id: "hook_2".to_string(),
            timeout_ms: 1000,
        };
        assert_eq!(err.to_string(), "Callback hook_2 timed out after 1000 ms");
        assert!(err.suggested_action().contains("timed out"));
    }
}
