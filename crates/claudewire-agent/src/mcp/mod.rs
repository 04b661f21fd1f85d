//! Model Context Protocol (MCP) integration.
//!
//! SDK MCP servers run in-process; the CLI reaches them through JSON-RPC
//! messages tunnelled in control requests.

pub mod bridge;
pub mod sdk;

// Re-export commonly used types
pub use bridge::{MCP_PROTOCOL_VERSION, ToolInfo, ToolRegistry, handle_request};
pub use sdk::{SdkMcpServer, SdkMcpServerBuilder, SdkTool, SdkToolError};
