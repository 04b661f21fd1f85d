//! Hook callbacks, matchers and the callback registry
//!
//! Hook callbacks live in the client process. During the handshake each
//! callback is registered under a stable id (`hook_0`, `hook_1`, ...) and the
//! CLI later invokes it by that id through a `hook_callback` control request.

use crate::error::{AgentError, Result};
use claudewire_protocol::{
    HookEvent, HookInput, HookMatcherConfig, HookOutput, RequestId, ToolPattern,
    sanitize_timeout_ms,
};
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Async hook handler
///
/// Receives the event input, the related tool use id (if any) and the
/// execution context.
pub type HookCallback = Arc<
    dyn Fn(HookInput, Option<String>, HookContext) -> BoxFuture<'static, Result<HookOutput>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`HookCallback`]
///
/// ```
/// use claudewire_agent::hooks::hook_fn;
/// use claudewire_protocol::HookOutput;
///
/// let deny_rm = hook_fn(|input, _tool_use_id, _ctx| async move {
///     let command = input.tool_input.as_ref().and_then(|i| i["command"].as_str());
///     if command.is_some_and(|c| c.starts_with("rm ")) {
///         return Ok(HookOutput::block("rm is not allowed"));
///     }
///     Ok(HookOutput::new())
/// });
/// ```
pub fn hook_fn<F, Fut>(f: F) -> HookCallback
where
    F: Fn(HookInput, Option<String>, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutput>> + Send + 'static,
{
    Arc::new(move |input, tool_use_id, ctx| Box::pin(f(input, tool_use_id, ctx)))
}

/// Execution context handed to a hook callback
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Id of the control request that triggered the callback
    pub request_id: RequestId,

    /// Cancelled when the callback times out, the CLI abandons the request or
    /// the client stops
    pub cancellation: CancellationToken,
}

impl HookContext {
    /// Whether the invocation has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Tool-name pattern plus the callbacks it triggers
#[derive(Clone)]
pub struct HookMatcher {
    pattern: ToolPattern,
    hooks: Vec<HookCallback>,
    timeout_ms: Option<u64>,
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("pattern", &self.pattern.as_str())
            .field("hooks", &self.hooks.len())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl HookMatcher {
    /// Matcher for a tool name, an alternation such as `Write|Edit`, or `*`
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: ToolPattern::new(Some(pattern.into())),
            hooks: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Matcher for every tool
    pub fn any() -> Self {
        Self {
            pattern: ToolPattern::any(),
            hooks: Vec::new(),
            timeout_ms: None,
        }
    }

    /// Append a callback
    pub fn hook(mut self, callback: HookCallback) -> Self {
        self.hooks.push(callback);
        self
    }

    /// Set the timeout, floored to one second
    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = sanitize_timeout_ms(Some(timeout_ms));
        self
    }

    /// Sanitized timeout in milliseconds
    pub fn timeout(&self) -> Option<u64> {
        self.timeout_ms
    }

    /// Whether a tool name triggers this matcher
    pub fn matches(&self, tool_name: &str) -> bool {
        self.pattern.matches(tool_name)
    }

    /// The pattern as sent to the CLI
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_str()
    }

    /// Callbacks in invocation order
    pub fn callbacks(&self) -> &[HookCallback] {
        &self.hooks
    }
}

/// Hook configuration: matchers grouped by event, in insertion order
#[derive(Debug, Clone, Default)]
pub struct HooksConfig {
    events: Vec<(HookEvent, Vec<HookMatcher>)>,
}

impl HooksConfig {
    /// Empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a matcher for an event
    pub fn on(mut self, event: HookEvent, matcher: HookMatcher) -> Self {
        match self.events.iter_mut().find(|(e, _)| *e == event) {
            Some((_, matchers)) => matchers.push(matcher),
            None => self.events.push((event, vec![matcher])),
        }
        self
    }

    /// Whether no matchers are configured
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Matchers for an event
    pub fn matchers(&self, event: HookEvent) -> &[HookMatcher] {
        self.events
            .iter()
            .find(|(e, _)| *e == event)
            .map(|(_, m)| m.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate events and their matchers
    pub fn iter(&self) -> impl Iterator<Item = (HookEvent, &[HookMatcher])> {
        self.events.iter().map(|(e, m)| (*e, m.as_slice()))
    }
}

/// Outcome of registering a [`HooksConfig`]
#[derive(Debug, Default)]
pub struct RegisteredHooks {
    /// `hooks` field of the `initialize` request
    pub payload: BTreeMap<String, Vec<HookMatcherConfig>>,

    /// Timeout per callback id, from the first matcher that registered it
    pub timeouts: HashMap<String, Duration>,
}

/// Bidirectional map between callbacks and their ids
///
/// A callback's identity is its `Arc` allocation: registering a clone of the
/// same `Arc` returns the existing id.
#[derive(Default)]
pub struct HookRegistry {
    by_id: HashMap<String, HookCallback>,
    by_identity: HashMap<usize, String>,
    next_id: usize,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("callbacks", &self.by_id.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

fn identity(callback: &HookCallback) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

impl HookRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, returning its id
    pub fn register(&mut self, callback: &HookCallback) -> String {
        let key = identity(callback);
        if let Some(id) = self.by_identity.get(&key) {
            return id.clone();
        }

        let id = format!("hook_{}", self.next_id);
        self.next_id += 1;
        self.by_identity.insert(key, id.clone());
        self.by_id.insert(id.clone(), Arc::clone(callback));
        id
    }

    /// Look up a callback by id
    pub fn lookup(&self, id: &str) -> Result<HookCallback> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::CallbackNotFound(id.to_string()))
    }

    /// Id of a registered callback
    pub fn id_of(&self, callback: &HookCallback) -> Option<String> {
        self.by_identity.get(&identity(callback)).cloned()
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Register every callback of a configuration and build the handshake payload
    pub fn register_config(&mut self, config: &HooksConfig) -> RegisteredHooks {
        let mut registered = RegisteredHooks::default();

        for (event, matchers) in config.iter() {
            let entries = matchers
                .iter()
                .map(|matcher| {
                    let ids: Vec<String> = matcher
                        .callbacks()
                        .iter()
                        .map(|callback| self.register(callback))
                        .collect();
                    if let Some(ms) = matcher.timeout() {
                        for id in &ids {
                            registered
                                .timeouts
                                .entry(id.clone())
                                .or_insert(Duration::from_millis(ms));
                        }
                    }
                    HookMatcherConfig::new(matcher.pattern(), ids, matcher.timeout())
                })
                .collect();
            registered.payload.insert(event.as_str().to_string(), entries);
        }

        registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> HookCallback {
        hook_fn(|_, _, _| async { Ok(HookOutput::new()) })
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = HookRegistry::new();
        let callback = noop();

        let first = registry.register(&callback);
        for _ in 0..5 {
            assert_eq!(registry.register(&Arc::clone(&callback)), first);
        }
        assert_eq!(first, "hook_0");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_follow_registration_order() {
        let mut registry = HookRegistry::new();
        let callbacks: Vec<HookCallback> = (0..3).map(|_| noop()).collect();

        let ids: Vec<String> = callbacks.iter().map(|c| registry.register(c)).collect();
        assert_eq!(ids, vec!["hook_0", "hook_1", "hook_2"]);

        for (callback, id) in callbacks.iter().zip(&ids) {
            assert_eq!(registry.id_of(callback).as_ref(), Some(id));
            assert!(Arc::ptr_eq(&registry.lookup(id).unwrap(), callback));
        }
    }

    #[test]
    fn test_lookup_unknown_id() {
        let registry = HookRegistry::new();
        assert_eq!(
            registry.lookup("hook_9").err(),
            Some(AgentError::CallbackNotFound("hook_9".to_string()))
        );
        assert!(registry.id_of(&noop()).is_none());
    }

    #[test]
    fn test_matcher_timeout_floor() {
        assert_eq!(HookMatcher::any().timeout_ms(0).timeout(), Some(1000));
        assert_eq!(HookMatcher::any().timeout_ms(-10).timeout(), Some(1000));
        assert_eq!(HookMatcher::any().timeout_ms(5000).timeout(), Some(5000));
        assert_eq!(HookMatcher::any().timeout(), None);
    }

    #[test]
    fn test_register_config_payload() {
        let shared = noop();
        let config = HooksConfig::new()
            .on(
                HookEvent::PreToolUse,
                HookMatcher::new("Bash").hook(Arc::clone(&shared)).timeout_ms(2500),
            )
            .on(HookEvent::PreToolUse, HookMatcher::any().hook(noop()))
            .on(HookEvent::Stop, HookMatcher::any().hook(shared));

        let mut registry = HookRegistry::new();
        let registered = registry.register_config(&config);

        assert_eq!(registry.len(), 2);
        let pre = &registered.payload["PreToolUse"];
        assert_eq!(pre.len(), 2);
        assert_eq!(pre[0].matcher.as_deref(), Some("Bash"));
        assert_eq!(pre[0].hook_callback_ids, vec!["hook_0"]);
        assert_eq!(pre[0].timeout, Some(2.5));
        assert_eq!(pre[1].matcher, None);
        assert_eq!(pre[1].timeout, None);
        assert_eq!(registered.payload["Stop"][0].hook_callback_ids, vec!["hook_0"]);
        assert_eq!(registered.timeouts["hook_0"], Duration::from_millis(2500));
        assert!(!registered.timeouts.contains_key("hook_1"));
    }
}
