//! Client and session configuration

use crate::hooks::{HookMatcher, HooksConfig};
use crate::mcp::ToolRegistry;
use crate::permissions::PermissionCallback;
use claudewire_protocol::HookEvent;
use claudewire_transport::ProcessConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default bound for the `initialize` handshake
pub const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound for outbound control requests
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound for callbacks whose matcher sets no timeout
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound for a streaming turn, reset on every event
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for a [`ControlClient`](crate::client::ControlClient)
///
/// Collects the CLI invocation, hook matchers, in-process tool servers and the
/// timeouts applied to every bounded wait.
#[derive(Clone)]
pub struct ClientConfig {
    /// CLI invocation
    pub process: ProcessConfig,

    /// Hook matchers sent in the handshake
    pub hooks: HooksConfig,

    /// In-process tool servers by name
    pub sdk_servers: HashMap<String, Arc<dyn ToolRegistry>>,

    /// Answers `can_use_tool` requests
    pub can_use_tool: Option<PermissionCallback>,

    /// Bound on the `initialize` handshake
    pub initialize_timeout: Duration,

    /// Bound on outbound control requests
    pub control_timeout: Duration,

    /// Bound on hook callbacks without a matcher timeout
    pub callback_timeout: Duration,

    /// Bound on permission callbacks and tool calls
    pub tool_timeout: Duration,

    /// Session id stamped on user messages
    pub session_id: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut servers: Vec<&String> = self.sdk_servers.keys().collect();
        servers.sort();
        f.debug_struct("ClientConfig")
            .field("process", &self.process)
            .field("hooks", &self.hooks)
            .field("sdk_servers", &servers)
            .field("can_use_tool", &self.can_use_tool.is_some())
            .field("initialize_timeout", &self.initialize_timeout)
            .field("control_timeout", &self.control_timeout)
            .field("callback_timeout", &self.callback_timeout)
            .field("tool_timeout", &self.tool_timeout)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            process: ProcessConfig::default(),
            hooks: HooksConfig::new(),
            sdk_servers: HashMap::new(),
            can_use_tool: None,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            tool_timeout: DEFAULT_CALLBACK_TIMEOUT,
            session_id: "default".to_string(),
        }
    }
}

impl ClientConfig {
    /// Create a new client config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CLI invocation
    pub fn with_process(mut self, process: ProcessConfig) -> Self {
        self.process = process;
        self
    }

    /// Replace the hook configuration
    pub fn with_hooks(mut self, hooks: HooksConfig) -> Self {
        self.hooks = hooks;
        self
    }

    /// Add a single hook matcher for an event
    pub fn add_hook(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        self.hooks = std::mem::take(&mut self.hooks).on(event, matcher);
        self
    }

    /// Register an in-process tool server under its own name
    ///
    /// A later server with the same name replaces the earlier one.
    pub fn add_sdk_server(mut self, server: Arc<dyn ToolRegistry>) -> Self {
        self.sdk_servers.insert(server.name().to_string(), server);
        self
    }

    /// Set the permission callback
    pub fn with_permission_callback(mut self, callback: PermissionCallback) -> Self {
        self.can_use_tool = Some(callback);
        self
    }

    /// Set the handshake timeout
    pub fn with_initialize_timeout(mut self, timeout: Duration) -> Self {
        self.initialize_timeout = timeout;
        self
    }

    /// Set the outbound control request timeout
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Set the fallback hook callback timeout
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Set the permission callback and tool call timeout
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Set the session id stamped on user messages
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Configuration for a [`StreamingSession`](crate::session::StreamingSession)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// CLI invocation
    pub process: ProcessConfig,

    /// Bound on silence during a turn
    pub turn_timeout: Duration,

    /// Session id stamped on user messages
    pub session_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            process: ProcessConfig::default(),
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            session_id: "default".to_string(),
        }
    }
}

impl SessionConfig {
    /// Create a new session config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CLI invocation
    pub fn with_process(mut self, process: ProcessConfig) -> Self {
        self.process = process;
        self
    }

    /// Set the turn timeout
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Set the session id stamped on user messages
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::hook_fn;
    use crate::mcp::SdkMcpServerBuilder;
    use claudewire_protocol::HookOutput;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.initialize_timeout, Duration::from_secs(60));
        assert_eq!(config.control_timeout, Duration::from_secs(60));
        assert_eq!(config.callback_timeout, Duration::from_secs(60));
        assert_eq!(config.session_id, "default");
        assert!(config.hooks.is_empty());
        assert!(config.can_use_tool.is_none());

        let session = SessionConfig::default();
        assert_eq!(session.turn_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_config_builder() {
        let server = SdkMcpServerBuilder::new("calc").build();
        let config = ClientConfig::new()
            .with_process(ProcessConfig::new("/usr/local/bin/claude"))
            .add_hook(
                HookEvent::PreToolUse,
                HookMatcher::new("Bash").hook(hook_fn(|_, _, _| async { Ok(HookOutput::new()) })),
            )
            .add_sdk_server(Arc::new(server))
            .with_control_timeout(Duration::from_secs(5))
            .with_session_id("abc");

        assert_eq!(config.process.program, "/usr/local/bin/claude");
        assert_eq!(config.hooks.matchers(HookEvent::PreToolUse).len(), 1);
        assert!(config.sdk_servers.contains_key("calc"));
        assert_eq!(config.control_timeout, Duration::from_secs(5));
        assert_eq!(config.session_id, "abc");

        let debug = format!("{:?}", config);
        assert!(debug.contains("calc"));
    }
}
