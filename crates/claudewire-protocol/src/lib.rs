//! Wire types for the claudewire control protocol
//!
//! The CLI subprocess and the client exchange newline-delimited JSON. This crate
//! holds the pure data side of that exchange: envelope classification, hook
//! configuration, streaming event types and the JSON-RPC shapes used by
//! in-process tool servers.
//!
//! # Type Organization
//!
//! - **Control envelopes**: [`control`] - Requests, responses, inbound classification
//! - **Hooks**: [`hooks`] - Events, matcher configuration, callback input/output
//! - **Streaming**: [`stream`] - Partial-message events and categorized errors
//! - **JSON-RPC**: [`jsonrpc`] - Bridge request/response types
//! - **Permissions**: [`permissions`] - Tool permission results
//! - **Common types**: [`types`] - Request ids, permission modes, user input
//! - **Error types**: [`error`] - Protocol errors
//!
//! # Design Principles
//!
//! - **Zero I/O**: All types are pure data structures
//! - **Forward compatible**: Unknown conversation messages pass through untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod hooks;
pub mod jsonrpc;
pub mod permissions;
pub mod stream;
pub mod types;

// Re-export commonly used types at crate level
pub use control::{
    CanUseToolRequest, ControlRequest, ControlResponse, HookCallbackRequest, Inbound,
    McpMessageRequest, OutboundRequest,
};
pub use error::{ProtocolError, Result};
pub use hooks::{
    HookEvent, HookInput, HookMatcherConfig, HookOutput, MIN_HOOK_TIMEOUT_MS, ToolPattern,
    sanitize_timeout_ms,
};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use permissions::PermissionResult;
pub use stream::{BlockKind, CategorizedError, ErrorCategory, StreamEvent, StreamEventKind};
pub use types::{PermissionMode, RequestId, UserInput};
