//! Streaming (partial message) event types
//!
//! With partial messages enabled the CLI emits the raw model stream as
//! `stream_event` envelopes. These types are the typed view produced by the
//! streaming parser.

use serde_json::Value;

/// One typed streaming event
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// What happened
    pub kind: StreamEventKind,

    /// Tool use that spawned the subagent producing this event, if any
    pub parent_tool_use_id: Option<String>,
}

impl StreamEvent {
    /// Create an event with no parent
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            kind,
            parent_tool_use_id: None,
        }
    }

    /// Final text if this is a `message_stop`
    pub fn final_text(&self) -> Option<&str> {
        match &self.kind {
            StreamEventKind::MessageStop { final_text, .. } => Some(final_text),
            _ => None,
        }
    }

    /// Whether this is a `message_stop`
    pub fn is_message_stop(&self) -> bool {
        matches!(self.kind, StreamEventKind::MessageStop { .. })
    }
}

/// Variant of a streaming event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    /// A new assistant message begins
    MessageStart,

    /// A content block begins
    ContentBlockStart {
        /// Kind of the block
        kind: BlockKind,
    },

    /// Text fragment
    TextDelta {
        /// The fragment
        text: String,
        /// Text accumulated so far, fragment included
        accumulated: String,
    },

    /// Fragment of a tool-use input JSON document
    InputJsonDelta {
        /// Raw JSON fragment
        partial_json: String,
    },

    /// Reasoning fragment
    ThinkingDelta {
        /// Reasoning text
        thinking: String,
    },

    /// A content block ends
    ContentBlockStop {
        /// Text accumulated for the block
        final_text: String,
    },

    /// Message-level metadata
    MessageDelta {
        /// Why generation stopped
        stop_reason: Option<String>,
        /// Stop sequence hit, if any
        stop_sequence: Option<String>,
    },

    /// The message is complete
    MessageStop {
        /// Text accumulated since the last reset
        final_text: String,
        /// Structured output, when requested
        structured_output: Option<Value>,
        /// Error attached to the message, if any
        error: Option<CategorizedError>,
    },

    /// Stream-level error
    Error {
        /// The error
        error: CategorizedError,
    },
}

/// Kind announced by `content_block_start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Plain text
    Text,
    /// Tool invocation
    ToolUse,
    /// Extended thinking
    Thinking,
    /// Anything else, kept by name
    Unknown(String),
}

impl BlockKind {
    /// Map a wire block type to a kind
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "text" => Self::Text,
            "tool_use" => Self::ToolUse,
            "thinking" => Self::Thinking,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Broad class of an API error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Too many requests
    RateLimit,
    /// Bad or missing credentials
    Authentication,
    /// Credentials lack access
    Permission,
    /// Service overloaded
    Overloaded,
    /// Malformed request
    InvalidRequest,
    /// Resource missing
    NotFound,
    /// Server-side failure
    Api,
    /// Unrecognized error type
    Unknown,
}

impl ErrorCategory {
    /// Map a wire error type to a category
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "rate_limit_error" => Self::RateLimit,
            "authentication_error" => Self::Authentication,
            "permission_error" => Self::Permission,
            "overloaded_error" => Self::Overloaded,
            "invalid_request_error" => Self::InvalidRequest,
            "not_found_error" => Self::NotFound,
            "api_error" => Self::Api,
            _ => Self::Unknown,
        }
    }

    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Overloaded | Self::Api)
    }
}

/// An error with its category and original message
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedError {
    /// Category
    pub category: ErrorCategory,
    /// Message text as sent
    pub message: String,
}

impl CategorizedError {
    /// Categorize an error object
    ///
    /// Accepts `{"type": ..., "message": ...}`, the nested
    /// `{"error": {"type": ..., "message": ...}}` form and bare strings.
    pub fn from_value(value: &Value) -> Self {
        if let Some(message) = value.as_str() {
            return Self {
                category: ErrorCategory::Unknown,
                message: message.to_string(),
            };
        }
        let inner = match value.get("error") {
            Some(nested) if nested.is_object() => nested,
            _ => value,
        };
        let kind = inner.get("type").and_then(Value::as_str).unwrap_or_default();
        let message = inner
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(kind)
            .to_string();
        Self {
            category: ErrorCategory::from_type(kind),
            message,
        }
    }
}

impl std::fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("rate_limit_error", ErrorCategory::RateLimit)]
    #[case("authentication_error", ErrorCategory::Authentication)]
    #[case("overloaded_error", ErrorCategory::Overloaded)]
    #[case("invalid_request_error", ErrorCategory::InvalidRequest)]
    #[case("api_error", ErrorCategory::Api)]
    #[case("something_new", ErrorCategory::Unknown)]
    fn test_error_categories(#[case] kind: &str, #[case] expected: ErrorCategory) {
        let error = CategorizedError::from_value(&json!({"type": kind, "message": "m"}));
        assert_eq!(error.category, expected);
        assert_eq!(error.message, "m");
    }

    #[test]
    fn test_nested_error_object() {
        let error = CategorizedError::from_value(&json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }));
        assert_eq!(error.category, ErrorCategory::Overloaded);
        assert_eq!(error.message, "Overloaded");
        assert!(error.category.is_transient());
    }

    #[test]
    fn test_block_kinds() {
        assert_eq!(BlockKind::from_type("tool_use"), BlockKind::ToolUse);
        assert_eq!(
            BlockKind::from_type("server_tool_use"),
            BlockKind::Unknown("server_tool_use".to_string())
        );
    }
}
