//! SDK MCP server implementation for in-process tool execution.
//!
//! Tools registered here run inside the client process. The CLI reaches them
//! through `sdk_mcp_request` control requests, answered by the
//! [bridge](super::bridge).
//!
//! # Example
//!
//! ```rust
//! use claudewire_agent::mcp::sdk::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct CalcInput { a: i32, b: i32 }
//!
//! #[derive(Serialize)]
//! struct CalcOutput { result: i32 }
//!
//! # async fn example() -> Result<(), SdkToolError> {
//! let server = SdkMcpServerBuilder::new("calculator")
//!     .tool("add", "Add two numbers", |input: CalcInput| async move {
//!         Ok(CalcOutput { result: input.a + input.b })
//!     })
//!     .build();
//!
//! let result = server.call("add", serde_json::json!({"a": 5, "b": 3})).await?;
//! assert_eq!(result, serde_json::json!({"result": 8}));
//! # Ok(())
//! # }
//! ```

use super::bridge::{ToolInfo, ToolRegistry};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during SDK tool execution.
#[derive(Debug, Error)]
pub enum SdkToolError {
    /// No tool with this name on the server
    #[error("Tool '{tool}' not found in server '{server}'")]
    NotFound {
        /// Requested tool
        tool: String,
        /// Server searched
        server: String,
    },

    /// Input JSON doesn't match expected schema
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tool execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An in-process MCP tool.
///
/// Implement this trait for full control, or use the builder API with
/// closures for simpler use cases.
#[async_trait]
pub trait SdkTool: Send + Sync {
    /// Unique identifier for this tool.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema describing the expected input format.
    fn input_schema(&self) -> Value;

    /// Execute the tool with the given input.
    async fn execute(&self, input: Value) -> Result<Value, SdkToolError>;
}

/// Type-safe wrapper for function-based tools.
///
/// Deserializes the input into `I`, runs the handler and serializes `O`.
pub struct FunctionTool<F, Fut, I, O> {
    name: String,
    description: String,
    schema: Value,
    handler: F,
    _phantom: PhantomData<fn(I) -> (Fut, O)>,
}

impl<F, Fut, I, O> FunctionTool<F, Fut, I, O> {
    /// Create a new function-based tool with a permissive object schema.
    pub fn new(name: String, description: String, handler: F) -> Self {
        Self::with_schema(name, description, permissive_schema(), handler)
    }

    /// Create a new function-based tool with an explicit input schema.
    pub fn with_schema(name: String, description: String, schema: Value, handler: F) -> Self {
        Self {
            name,
            description,
            schema,
            handler,
            _phantom: PhantomData,
        }
    }
}

fn permissive_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "additionalProperties": true
    })
}

#[async_trait]
impl<F, Fut, I, O> SdkTool for FunctionTool<F, Fut, I, O>
where
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, SdkToolError>> + Send,
    I: DeserializeOwned + Send,
    O: Serialize + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, input: Value) -> Result<Value, SdkToolError> {
        let typed_input: I = serde_json::from_value(input).map_err(|e| {
            SdkToolError::InvalidInput(format!("Failed to deserialize input: {}", e))
        })?;

        let output = (self.handler)(typed_input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Builder for creating SDK MCP servers with a fluent API.
pub struct SdkMcpServerBuilder {
    name: String,
    version: String,
    tools: BTreeMap<String, Arc<dyn SdkTool>>,
}

impl SdkMcpServerBuilder {
    /// Create a new builder with the given server name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            tools: BTreeMap::new(),
        }
    }

    /// Set the version reported to the CLI.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Add a function-based tool with type-safe input/output.
    pub fn tool<F, Fut, I, O>(self, name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, SdkToolError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        self.tool_with_schema(name, description, permissive_schema(), handler)
    }

    /// Add a function-based tool with an explicit JSON Schema.
    ///
    /// ```rust
    /// # use claudewire_agent::mcp::sdk::*;
    /// # use serde::Deserialize;
    /// # #[derive(Deserialize)]
    /// # struct Input { x: i32 }
    /// let builder = SdkMcpServerBuilder::new("math").tool_with_schema(
    ///     "double",
    ///     "Double a number",
    ///     serde_json::json!({"type": "object", "properties": {"x": {"type": "integer"}}, "required": ["x"]}),
    ///     |input: Input| async move { Ok(input.x * 2) },
    /// );
    /// ```
    pub fn tool_with_schema<F, Fut, I, O>(
        mut self,
        name: &str,
        description: &str,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, SdkToolError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        let tool =
            FunctionTool::with_schema(name.to_string(), description.to_string(), schema, handler);
        self.tools.insert(name.to_string(), Arc::new(tool));
        self
    }

    /// Add a custom tool implementation.
    pub fn add_tool(mut self, tool: Arc<dyn SdkTool>) -> Self {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
        self
    }

    /// Build the SDK MCP server.
    pub fn build(self) -> SdkMcpServer {
        SdkMcpServer {
            name: self.name,
            version: self.version,
            tools: self.tools,
        }
    }
}

/// An in-process MCP server.
///
/// Immutable after construction; cheap to clone.
#[derive(Clone)]
pub struct SdkMcpServer {
    name: String,
    version: String,
    tools: BTreeMap<String, Arc<dyn SdkTool>>,
}

impl std::fmt::Debug for SdkMcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkMcpServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tool_count", &self.tools.len())
            .finish()
    }
}

impl SdkMcpServer {
    /// Get a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<&Arc<dyn SdkTool>> {
        self.tools.get(name)
    }

    /// Check if a tool exists in this server.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of tools in this server.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Run a tool and return its raw JSON output.
    pub async fn call(&self, name: &str, input: Value) -> Result<Value, SdkToolError> {
        match self.get_tool(name) {
            Some(tool) => tool.execute(input).await,
            None => Err(SdkToolError::NotFound {
                tool: name.to_string(),
                server: self.name.clone(),
            }),
        }
    }
}

/// Wrap a tool's JSON output as MCP content blocks
///
/// Output already shaped as `{"content": [...]}` is passed through; strings
/// become one text block; anything else is serialized into one text block.
pub fn to_content(output: Value) -> Vec<Value> {
    match output {
        Value::Object(mut map) if matches!(map.get("content"), Some(Value::Array(_))) => {
            match map.remove("content") {
                Some(Value::Array(blocks)) => blocks,
                _ => Vec::new(),
            }
        }
        Value::String(text) => vec![json!({"type": "text", "text": text})],
        other => vec![json!({"type": "text", "text": other.to_string()})],
    }
}

#[async_trait]
impl ToolRegistry for SdkMcpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Vec<Value>, SdkToolError> {
        self.call(name, arguments).await.map(to_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct TestInput {
        value: i32,
    }

    #[derive(Serialize, PartialEq, Debug)]
    struct TestOutput {
        result: i32,
    }

    #[tokio::test]
    async fn test_function_tool_execution() {
        let tool = FunctionTool::new(
            "double".to_string(),
            "Double a number".to_string(),
            |input: TestInput| async move {
                Ok(TestOutput {
                    result: input.value * 2,
                })
            },
        );

        let output = tool.execute(json!({"value": 21})).await.expect("execution failed");
        assert_eq!(output, json!({"result": 42}));
    }

    #[tokio::test]
    async fn test_sdk_server_builder() {
        let server = SdkMcpServerBuilder::new("test-server")
            .version("2.1.0")
            .tool("add", "Add ten", |input: TestInput| async move {
                Ok(TestOutput {
                    result: input.value + 10,
                })
            })
            .tool("multiply", "Multiply by two", |input: TestInput| async move {
                Ok(TestOutput {
                    result: input.value * 2,
                })
            })
            .build();

        assert_eq!(ToolRegistry::name(&server), "test-server");
        assert_eq!(ToolRegistry::version(&server), "2.1.0");
        assert_eq!(server.tool_count(), 2);
        assert!(server.has_tool("add"));
        assert!(!server.has_tool("nonexistent"));
    }

    #[tokio::test]
    async fn test_tool_not_found() {
        let server = SdkMcpServerBuilder::new("empty").build();

        match server.call("missing", json!({})).await {
            Err(e @ SdkToolError::NotFound { .. }) => assert!(e.to_string().contains("not found")),
            other => panic!("Expected NotFound error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_invalid_input_deserialization() {
        let server = SdkMcpServerBuilder::new("test")
            .tool("strict", "Strict input", |input: TestInput| async move {
                Ok(TestOutput {
                    result: input.value,
                })
            })
            .build();

        let result = server.call("strict", json!({})).await;
        assert!(matches!(result, Err(SdkToolError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_list_tools_uses_schema() {
        let schema = json!({"type": "object", "properties": {"value": {"type": "integer"}}});
        let server = SdkMcpServerBuilder::new("test")
            .tool_with_schema("echo", "Echo", schema.clone(), |input: TestInput| async move {
                Ok(input.value)
            })
            .build();

        let tools = server.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].input_schema, schema);
    }

    #[test]
    fn test_to_content() {
        assert_eq!(to_content(json!("hi")), vec![json!({"type": "text", "text": "hi"})]);
        assert_eq!(
            to_content(json!({"sum": 3})),
            vec![json!({"type": "text", "text": "{\"sum\":3}"})]
        );
        let blocks = json!({"content": [{"type": "image", "data": "..."}]});
        assert_eq!(to_content(blocks), vec![json!({"type": "image", "data": "..."})]);
    }
}
