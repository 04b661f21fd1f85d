//! Control-protocol runtime for the claude CLI
//!
//! Drives a long-running CLI subprocess over newline-delimited JSON. The CLI
//! streams conversation output and calls back into this process to run hook
//! callbacks, permission checks and in-process tools.
//!
//! # Key Features
//!
//! - **Control client**: [`ControlClient`] performs the `initialize` handshake,
//!   answers CLI requests on time-bounded tasks and correlates its own requests
//! - **Hooks**: [`hooks`] registers callbacks by id and matches tool names
//! - **In-process tools**: [`mcp`] exposes [`SdkMcpServer`]s to the CLI over a
//!   JSON-RPC bridge
//! - **Streaming session**: [`StreamingSession`] multiplexes turns over one
//!   process, one active subscriber at a time
//! - **Streaming parser**: [`parser`] turns partial-message events into typed
//!   [`StreamEvent`](claudewire_protocol::StreamEvent)s
//!
//! # Architecture
//!
//! 1. **Protocol Layer** (`claudewire-protocol`): wire types, no I/O
//! 2. **Transport Layer** (`claudewire-transport`): subprocess and line framing
//! 3. **Agent Layer** (this crate): coordinators and callbacks
//!
//! Each coordinator is one tokio task that owns all of its mutable state;
//! handles talk to it through channels.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod mcp;
pub mod parser;
pub mod permissions;
pub mod session;
pub mod testing;

// Re-export commonly used types
pub use client::{ClientEvent, ClientState, ClientStream, ControlClient, EndReason};
pub use config::{ClientConfig, SessionConfig};
pub use error::{AgentError, ErrorRecovery, Result};
pub use hooks::{HookCallback, HookContext, HookMatcher, HookRegistry, HooksConfig, hook_fn};
pub use mcp::{SdkMcpServer, SdkMcpServerBuilder, SdkToolError, ToolRegistry};
pub use parser::{parse_buffer, parse_event};
pub use permissions::{PermissionCallback, ToolPermissionContext, permission_fn};
pub use session::{StreamingSession, TurnEvent, TurnStream};

pub use claudewire_protocol as protocol;
pub use claudewire_transport as transport;
