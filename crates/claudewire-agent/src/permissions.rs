//! Tool permission callbacks
//!
//! When the CLI needs a decision about a tool call it sends `can_use_tool`.
//! The client answers with the configured [`PermissionCallback`].

use crate::error::Result;
use claudewire_protocol::{PermissionResult, RequestId};
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context passed alongside a permission check
#[derive(Debug, Clone)]
pub struct ToolPermissionContext {
    /// Id of the `can_use_tool` request
    pub request_id: RequestId,

    /// Permission updates the CLI suggests
    pub suggestions: Vec<Value>,

    /// Path that triggered the check, if any
    pub blocked_path: Option<String>,

    /// Cancelled on timeout or client stop
    pub cancellation: CancellationToken,
}

/// Async permission decision: `(tool_name, input, context) -> result`
pub type PermissionCallback = Arc<
    dyn Fn(String, Value, ToolPermissionContext) -> BoxFuture<'static, Result<PermissionResult>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`PermissionCallback`]
pub fn permission_fn<F, Fut>(f: F) -> PermissionCallback
where
    F: Fn(String, Value, ToolPermissionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PermissionResult>> + Send + 'static,
{
    Arc::new(move |tool_name, input, ctx| Box::pin(f(tool_name, input, ctx)))
}
