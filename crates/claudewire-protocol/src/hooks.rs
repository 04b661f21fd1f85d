//! Hook system types and tool-name matching
//!
//! Hooks are registered with the CLI during the `initialize` handshake as a map
//! of event name to matcher list. Each matcher names the callback ids the CLI
//! should invoke, a tool-name pattern and an optional timeout.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Smallest timeout, in milliseconds, accepted for a matcher
pub const MIN_HOOK_TIMEOUT_MS: u64 = 1000;

/// Apply the timeout floor to a configured matcher timeout
///
/// A present value below the floor (including zero and negatives) becomes
/// [`MIN_HOOK_TIMEOUT_MS`]; an absent value stays absent so the CLI can apply
/// its own default.
///
/// ```
/// use claudewire_protocol::hooks::sanitize_timeout_ms;
///
/// assert_eq!(sanitize_timeout_ms(Some(0)), Some(1000));
/// assert_eq!(sanitize_timeout_ms(Some(5000)), Some(5000));
/// assert_eq!(sanitize_timeout_ms(None), None);
/// ```
pub fn sanitize_timeout_ms(timeout_ms: Option<i64>) -> Option<u64> {
    timeout_ms.map(|ms| {
        if ms <= MIN_HOOK_TIMEOUT_MS as i64 {
            MIN_HOOK_TIMEOUT_MS
        } else {
            ms as u64
        }
    })
}

/// Lifecycle events a hook can subscribe to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookEvent {
    /// Before a tool runs
    PreToolUse,
    /// After a tool returns
    PostToolUse,
    /// When the user submits a prompt
    UserPromptSubmit,
    /// When the agent stops
    Stop,
    /// When a subagent stops
    SubagentStop,
    /// Before context compaction
    PreCompact,
    /// CLI notification
    Notification,
    /// Session start
    SessionStart,
    /// Session end
    SessionEnd,
}

impl HookEvent {
    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::Notification => "Notification",
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
        }
    }
}

/// Tool-name pattern of a matcher
///
/// An absent, empty or `*` pattern matches every tool. Anything else is matched
/// against the whole tool name, so `Write|Edit` is an alternation of exact
/// names. A pattern that is not a valid regex falls back to a literal match.
#[derive(Debug, Clone)]
pub struct ToolPattern {
    source: Option<String>,
    kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Any,
    Regex(Regex),
    Literal(String),
}

impl ToolPattern {
    /// Compile a pattern
    pub fn new(pattern: Option<String>) -> Self {
        let source = pattern.filter(|p| !p.is_empty() && p != "*");
        let kind = match source.as_deref() {
            None => PatternKind::Any,
            Some(p) => match Regex::new(&format!("^(?:{})$", p)) {
                Ok(regex) => PatternKind::Regex(regex),
                Err(_) => PatternKind::Literal(p.to_string()),
            },
        };
        Self { source, kind }
    }

    /// Pattern matching every tool
    pub fn any() -> Self {
        Self::new(None)
    }

    /// Whether this pattern is a wildcard
    pub fn is_wildcard(&self) -> bool {
        matches!(self.kind, PatternKind::Any)
    }

    /// Test a tool name against the pattern
    pub fn matches(&self, tool_name: &str) -> bool {
        match &self.kind {
            PatternKind::Any => true,
            PatternKind::Regex(regex) => regex.is_match(tool_name),
            PatternKind::Literal(literal) => literal == tool_name,
        }
    }

    /// The pattern as sent to the CLI (`None` for a wildcard)
    pub fn as_str(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

/// One matcher entry of the `initialize` hooks payload
///
/// The timeout is carried in seconds and omitted entirely when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookMatcherConfig {
    /// Tool-name pattern, `null` for all tools
    pub matcher: Option<String>,

    /// Callback ids the CLI should invoke, in order
    pub hook_callback_ids: Vec<String>,

    /// Timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl HookMatcherConfig {
    /// Build a matcher entry from a pattern, callback ids and a timeout in milliseconds
    pub fn new(
        matcher: Option<&str>,
        hook_callback_ids: Vec<String>,
        timeout_ms: Option<u64>,
    ) -> Self {
        Self {
            matcher: matcher.map(str::to_string),
            hook_callback_ids,
            timeout: timeout_ms.map(|ms| ms as f64 / 1000.0),
        }
    }
}

/// Input the CLI passes to a hook callback
///
/// Only the fields common to every event are typed; event-specific fields are
/// kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookInput {
    /// Event that fired
    #[serde(default)]
    pub hook_event_name: String,

    /// Session the event belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Transcript file of the session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,

    /// Working directory of the CLI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Tool involved (tool events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Tool input (tool events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,

    /// Remaining event-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Output a hook callback returns to the CLI
///
/// Every field is optional; an empty output lets the CLI proceed unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Whether the agent should continue after the hook
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,

    /// Hide the hook's output from the transcript
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,

    /// Message shown when `continue` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    /// `"block"` to block the action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Message shown to the user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// Feedback for the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Event-specific output (e.g. permission decisions for PreToolUse)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<Value>,
}

impl HookOutput {
    /// Empty output, the CLI proceeds as if no hook ran
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the action with feedback for the model
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            decision: Some("block".to_string()),
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Stop the agent
    pub fn stop(stop_reason: impl Into<String>) -> Self {
        Self {
            continue_: Some(false),
            stop_reason: Some(stop_reason.into()),
            ..Self::default()
        }
    }

    /// Set the message shown to the user
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    /// Set event-specific output
    pub fn with_hook_specific_output(mut self, output: Value) -> Self {
        self.hook_specific_output = Some(output);
        self
    }

    /// Hide the hook's output from the transcript
    pub fn suppress_output(mut self) -> Self {
        self.suppress_output = Some(true);
        self
    }
}
