//! Common protocol types

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Identifier correlating a control request with its response
///
/// Client-issued ids have the shape `req_<counter>_<8 hex chars>`; ids issued by
/// the CLI are opaque and echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a client request id for the given sequence number
    pub fn generate(counter: u64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("req_{}_{}", counter, &suffix[..8]))
    }

    /// Create from raw string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Permission mode for tool execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask for permission on each tool use
    #[default]
    Default,

    /// Automatically accept file edits
    AcceptEdits,

    /// Plan only, do not execute tools
    Plan,

    /// Bypass permission checks entirely
    BypassPermissions,
}

impl PermissionMode {
    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Content of one user turn written to the CLI
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// Plain text prompt
    Text(String),

    /// Pre-built content blocks (text, images, tool results)
    Structured(Vec<Value>),
}

impl UserInput {
    /// Build the conversation frame for this input
    ///
    /// ```
    /// use claudewire_protocol::UserInput;
    ///
    /// let frame = UserInput::from("hi").to_frame("default");
    /// assert_eq!(frame["type"], "user");
    /// assert_eq!(frame["message"]["content"], "hi");
    /// ```
    pub fn to_frame(&self, session_id: &str) -> Value {
        let content = match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Structured(blocks) => Value::Array(blocks.clone()),
        };
        json!({
            "type": "user",
            "message": {"role": "user", "content": content},
            "parent_tool_use_id": null,
            "session_id": session_id,
        })
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}
