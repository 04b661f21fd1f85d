//! Subprocess transport for CLI communication
//!
//! Implements bidirectional communication with the CLI via stdin/stdout
//! newline-delimited JSON.

pub mod framing;
pub mod process;

pub use framing::LineBuffer;
pub use process::{ProcessConfig, StderrCallback, SubprocessTransport};
