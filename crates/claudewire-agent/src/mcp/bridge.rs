//! JSON-RPC bridge between the CLI and in-process tool registries
//!
//! The CLI talks MCP to SDK servers by tunnelling JSON-RPC messages through
//! `sdk_mcp_request` control requests. This module answers those messages.

use async_trait::async_trait;
use claudewire_protocol::JsonRpcRequest;
use claudewire_protocol::JsonRpcResponse;
use claudewire_protocol::jsonrpc::{INTERNAL_ERROR, METHOD_NOT_FOUND};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::sdk::SdkToolError;
use crate::error::AgentError;

/// MCP protocol version advertised to the CLI
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Description of one tool as listed by `tools/list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    /// Tool name
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema of the input
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// An in-process tool registry reachable from the CLI
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Server name the CLI addresses
    fn name(&self) -> &str;

    /// Server version reported on `initialize`
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Tools offered by this registry
    fn list_tools(&self) -> Vec<ToolInfo>;

    /// Run a tool, returning MCP content blocks
    async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Vec<Value>, SdkToolError>;
}

/// Answer one JSON-RPC message for a server
///
/// `server` is `None` when the CLI names a server that was never registered.
/// Every outcome is a JSON-RPC response; failures use the JSON-RPC error codes
/// rather than Rust errors.
pub async fn handle_request(
    server_name: &str,
    server: Option<Arc<dyn ToolRegistry>>,
    message: JsonRpcRequest,
) -> JsonRpcResponse {
    let id = message.id.clone();
    let Some(server) = server else {
        debug!(server = server_name, "JSON-RPC request for unknown server");
        return JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Server '{}' not found", server_name),
        );
    };

    debug!(server = server_name, method = %message.method, "Handling JSON-RPC request");
    match message.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": server.name(), "version": server.version()},
            }),
        ),
        "notifications/initialized" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({"tools": server.list_tools()})),
        "tools/call" => {
            let Some(name) = message.param("name").and_then(Value::as_str) else {
                return JsonRpcResponse::error(id, INTERNAL_ERROR, "Missing tool name");
            };
            let arguments = message
                .param("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            match server.execute_tool(name, arguments).await {
                Ok(content) => JsonRpcResponse::success(id, json!({"content": content})),
                Err(e) => {
                    let err = AgentError::from(e);
                    debug!(server = server_name, tool = name, error = %err, "Tool call failed");
                    JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string())
                }
            }
        }
        other => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method '{}' not found", other),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::sdk::SdkMcpServerBuilder;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    fn calculator() -> Arc<dyn ToolRegistry> {
        Arc::new(
            SdkMcpServerBuilder::new("calc")
                .tool("add", "Add two numbers", |input: AddInput| async move {
                    Ok(json!({"sum": input.a + input.b}))
                })
                .build(),
        )
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(1, method, params)
    }

    #[tokio::test]
    async fn test_initialize_reports_server_info() {
        let response = handle_request("calc", Some(calculator()), request("initialize", None)).await;
        let result = response.result.unwrap();

        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "calc");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let response = handle_request("nope", None, request("tools/list", None)).await;
        assert_eq!(response.error_code(), Some(METHOD_NOT_FOUND));
        assert_eq!(response.id, json!(1));
    }

    #[tokio::test]
    async fn test_missing_tool_name() {
        let response = handle_request(
            "calc",
            Some(calculator()),
            request("tools/call", Some(json!({"arguments": {}}))),
        )
        .await;
        assert_eq!(response.error_code(), Some(INTERNAL_ERROR));
    }

    #[tokio::test]
    async fn test_notification_initialized() {
        let mut message = request("notifications/initialized", None);
        message.id = None;
        let response = handle_request("calc", Some(calculator()), message).await;

        assert_eq!(response.result, Some(json!({})));
        assert_eq!(response.id, Value::Null);
    }
}
