//! Subprocess transport for claudewire
//!
//! Owns one CLI subprocess and speaks newline-delimited JSON with it.
//!
//! # Architecture
//!
//! - **Transport trait**: [`Transport`] abstracts the line channel so coordinators
//!   can run against an in-memory transport in tests
//! - **Subprocess transport**: [`SubprocessTransport`] spawns the CLI, writes
//!   whole lines to stdin and fans complete stdout lines out to subscribers
//! - **Framing**: [`LineBuffer`] reassembles stdout byte chunks into lines
//! - **Diagnostics**: stderr is routed to a callback and to `tracing`, never
//!   into the line stream

#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! # Usage
//!
//! ```ignore
//! use claudewire_transport::{ProcessConfig, SubprocessTransport, Transport, TransportEvent};
//!
//! let transport = SubprocessTransport::spawn(ProcessConfig::default())?;
//! let mut events = transport.subscribe();
//! transport.send_line(r#"{"type":"user","message":{"role":"user","content":"hi"}}"#).await?;
//! while let Some(TransportEvent::Line(line)) = events.recv().await {
//!     println!("{line}");
//! }
//! ```

pub mod error;
pub mod subprocess;
pub mod traits;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use subprocess::{LineBuffer, ProcessConfig, StderrCallback, SubprocessTransport};
pub use traits::{Transport, TransportEvent};
