//! Transport trait
//!
//! Defines the line-oriented channel every coordinator talks through.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Event delivered to transport subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One complete stdout line, without its newline
    Line(String),

    /// The process closed stdout; no further events follow
    Exited {
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },
}

/// Bidirectional line channel to a CLI process
///
/// Implementations must deliver lines to every subscriber in order and finish
/// each subscription with exactly one [`TransportEvent::Exited`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one line; a trailing newline is appended if absent
    ///
    /// The whole line is written in a single write so concurrent callers never
    /// interleave partial lines.
    async fn send_line(&self, line: &str) -> Result<()>;

    /// Serialize a JSON value and write it as one line
    async fn send_json(&self, value: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(value)?;
        self.send_line(&line).await
    }

    /// Register a new subscriber
    ///
    /// Lines the process wrote before anyone subscribed go to the first
    /// subscriber.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Flush and terminate; calling it again is a no-op
    async fn close(&self) -> Result<()>;

    /// Whether the process is still running
    fn is_alive(&self) -> bool;
}
