//! Streaming session: many turns over one CLI process
//!
//! A [`StreamingSession`] serializes turns. The first [`send`] writes its
//! message and its [`TurnStream`] receives the turn's events; senders that
//! arrive while a turn is in flight wait in FIFO order and their message is
//! written only when the previous turn completes.
//!
//! [`send`]: StreamingSession::send
//!
//! ```no_run
//! use claudewire_agent::config::SessionConfig;
//! use claudewire_agent::session::{StreamingSession, TurnEvent};
//! use futures::StreamExt;
//!
//! # async fn example() -> claudewire_agent::Result<()> {
//! let session = StreamingSession::spawn(SessionConfig::default())?;
//!
//! let mut first = session.send("Summarize README.md");
//! let mut second = session.send("Now list its headings");
//!
//! while let Some(event) = first.next().await {
//!     if let TurnEvent::Completed { final_text, .. } = event {
//!         println!("{}", final_text);
//!     }
//! }
//! # let _ = second.next().await;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod actor;

use crate::config::SessionConfig;
use crate::error::{AgentError, Result};
use actor::{SessionActor, SessionCommand};
use claudewire_protocol::{StreamEvent, UserInput};
use claudewire_transport::{SubprocessTransport, Transport};
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Event of one turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Parsed streaming event
    Stream(StreamEvent),

    /// Any other message, verbatim
    Message(Value),

    /// The turn finished
    Completed {
        /// Text of the final message, all text blocks concatenated
        final_text: String,
        /// Last stop reason reported by `message_delta`
        stop_reason: Option<String>,
    },

    /// No event arrived within the turn timeout
    TimedOut,

    /// The turn failed or the session ended
    Error(AgentError),
}

impl TurnEvent {
    /// Whether this event ends the turn
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::TimedOut | Self::Error(_)
        )
    }
}

/// Events of one turn; finite and not restartable
///
/// Dropping the stream before the turn ends unsubscribes it. An active turn
/// keeps running with its remaining events discarded; a queued turn is
/// removed from the queue.
#[derive(Debug)]
pub struct TurnStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<TurnEvent>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    done: bool,
}

impl TurnStream {
    /// Subscriber id within the session
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for TurnStream {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.done = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.commands.send(SessionCommand::Unsubscribe { id: self.id });
        }
    }
}

/// Handle to a multiplexed streaming session
///
/// Cheap to clone. The session ends on [`close`](Self::close), when the CLI
/// exits, or when every handle and stream is dropped.
#[derive(Debug, Clone)]
pub struct StreamingSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
    next_id: Arc<AtomicU64>,
}

impl StreamingSession {
    /// Spawn the CLI and start the session
    pub fn spawn(config: SessionConfig) -> Result<Self> {
        let transport = SubprocessTransport::spawn(config.process.clone())?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Start a session over an existing transport
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_transport(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let events = transport.subscribe();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let actor = SessionActor::new(transport, config.session_id, config.turn_timeout);
        tokio::spawn(actor.run(events, commands_rx));

        Self {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send a message as a new turn
    ///
    /// The turn starts immediately when the session is idle and otherwise
    /// waits behind earlier turns.
    pub fn send(&self, input: impl Into<UserInput>) -> TurnStream {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let command = SessionCommand::Send {
            id,
            input: input.into(),
            tx,
        };
        if let Err(mpsc::error::SendError(SessionCommand::Send { tx, .. })) =
            self.commands.send(command)
        {
            let _ = tx.send(TurnEvent::Error(AgentError::Disconnected));
        }

        TurnStream {
            id,
            rx,
            commands: self.commands.clone(),
            done: false,
        }
    }

    /// Close the CLI; pending turns end with [`AgentError::Disconnected`]
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}
