//! Control-protocol client
//!
//! [`ControlClient`] drives one CLI process through the bidirectional control
//! protocol: it performs the `initialize` handshake, answers hook, permission
//! and tool requests from the CLI, correlates its own requests with their
//! responses, and fans conversation messages out to subscribers.
//!
//! # Example
//!
//! ```no_run
//! use claudewire_agent::client::{ClientEvent, ControlClient};
//! use claudewire_agent::config::ClientConfig;
//! use claudewire_agent::hooks::{HookMatcher, hook_fn};
//! use claudewire_protocol::{HookEvent, HookOutput};
//! use futures::StreamExt;
//!
//! # async fn example() -> claudewire_agent::Result<()> {
//! let config = ClientConfig::new().add_hook(
//!     HookEvent::PreToolUse,
//!     HookMatcher::new("Bash").hook(hook_fn(|_input, _tool_use_id, _ctx| async {
//!         Ok(HookOutput::new())
//!     })),
//! );
//!
//! let client = ControlClient::connect(config).await?;
//! let mut events = client.subscribe();
//! client.send_message("List the files in this directory").await?;
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         ClientEvent::Message(message) => println!("{}", message),
//!         ClientEvent::End(reason) => println!("ended: {}", reason),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod actor;
mod dispatch;

use crate::config::ClientConfig;
use crate::error::{AgentError, Result};
use actor::{ClientActor, Command, Handshake};
use claudewire_protocol::control::request_line;
use claudewire_protocol::{OutboundRequest, PermissionMode, RequestId, UserInput};
use claudewire_transport::{SubprocessTransport, Transport};
use futures::Stream;
use serde::Serialize;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Lifecycle of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No process attached yet
    Disconnected,
    /// Process running, handshake not sent
    Connecting,
    /// `initialize` sent, awaiting the response
    Initializing,
    /// Handshake complete; messages may be sent
    Ready,
    /// Stopped or the process exited; terminal
    Terminated,
}

/// Why a client's event streams ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// [`ControlClient::stop`] was called or every handle was dropped
    Stopped,
    /// The CLI process exited
    ProcessExited {
        /// Exit code, if any
        code: Option<i32>,
    },
    /// The handshake failed or timed out
    HandshakeFailed(String),
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::ProcessExited { code: Some(code) } => write!(f, "CLI exited with code {}", code),
            Self::ProcessExited { code: None } => write!(f, "CLI exited"),
            Self::HandshakeFailed(reason) => write!(f, "handshake failed: {}", reason),
        }
    }
}

/// Event delivered to client subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Conversation message, verbatim
    Message(Value),
    /// Last event of the stream
    End(EndReason),
}

/// Stream of [`ClientEvent`]s; finishes after [`ClientEvent::End`]
#[derive(Debug)]
pub struct ClientStream {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    done: bool,
}

impl ClientStream {
    fn new(rx: mpsc::UnboundedReceiver<ClientEvent>) -> Self {
        Self { rx, done: false }
    }
}

impl Stream for ClientStream {
    type Item = ClientEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if matches!(event, ClientEvent::End(_)) {
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

/// Handle to a running control client
///
/// Cheap to clone; every clone talks to the same coordinator task. The client
/// stops when [`stop`](Self::stop) is called, when the CLI exits, or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct ControlClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ClientState>,
    end: watch::Receiver<Option<EndReason>>,
    handshake: watch::Receiver<Option<Result<()>>>,
    counter: Arc<AtomicU64>,
    control_timeout: Duration,
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient")
            .field("state", &*self.state.borrow())
            .field("control_timeout", &self.control_timeout)
            .finish()
    }
}

impl ControlClient {
    /// Spawn the CLI and complete the handshake
    ///
    /// Fails with [`AgentError::Spawn`] if the executable cannot be started
    /// and with [`AgentError::HandshakeFailed`] or [`AgentError::Timeout`] if
    /// the CLI does not accept the `initialize` request.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::start(config)?;
        client.wait_ready().await?;
        Ok(client)
    }

    /// Complete the handshake over an existing transport
    pub async fn connect_with_transport(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        let client = Self::start_with_transport(transport, config);
        client.wait_ready().await?;
        Ok(client)
    }

    /// Spawn the CLI and begin the handshake without waiting for it
    pub fn start(config: ClientConfig) -> Result<Self> {
        let transport = SubprocessTransport::spawn(config.process.clone())?;
        Ok(Self::start_with_transport(Arc::new(transport), config))
    }

    /// Begin the handshake over an existing transport without waiting for it
    ///
    /// Must be called from within a tokio runtime. Until the handshake
    /// completes, sends fail with [`AgentError::NotConnected`].
    pub fn start_with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let events = transport.subscribe();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ClientState::Disconnected);
        let (end_tx, end_rx) = watch::channel(None);
        let (handshake_tx, handshake_rx): (Handshake, _) = watch::channel(None);
        let counter = Arc::new(AtomicU64::new(0));
        let control_timeout = config.control_timeout;

        let actor = ClientActor::new(
            transport,
            config,
            state_tx,
            end_tx,
            Arc::clone(&counter),
            completions_tx,
        );
        tokio::spawn(actor.run(events, commands_rx, completions_rx, handshake_tx));

        Self {
            commands: commands_tx,
            state: state_rx,
            end: end_rx,
            handshake: handshake_rx,
            counter,
            control_timeout,
        }
    }

    /// Wait for the handshake outcome
    ///
    /// Bounded by the configured `initialize_timeout`.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut handshake = self.handshake.clone();
        let _ = handshake.wait_for(Option::is_some).await;
        let outcome = handshake.borrow().clone();
        outcome.unwrap_or(Err(AgentError::Disconnected))
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    /// Send a user message
    ///
    /// Fails with [`AgentError::NotConnected`] unless the client is
    /// [`Ready`](ClientState::Ready).
    pub async fn send_message(&self, input: impl Into<UserInput>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SendMessage {
                input: input.into(),
                reply,
            })
            .map_err(|_| AgentError::Disconnected)?;
        rx.await.map_err(|_| AgentError::Disconnected)?
    }

    /// Interrupt the current turn
    pub async fn interrupt(&self) -> Result<()> {
        self.control(&OutboundRequest::Interrupt, "interrupt")
            .await
            .map(|_| ())
    }

    /// Switch the model; `None` restores the CLI default
    pub async fn set_model(&self, model: Option<String>) -> Result<()> {
        self.control(&OutboundRequest::SetModel { model }, "set_model")
            .await
            .map(|_| ())
    }

    /// Change the permission mode
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.control(
            &OutboundRequest::SetPermissionMode { mode },
            "set_permission_mode",
        )
        .await
        .map(|_| ())
    }

    /// Send an arbitrary control request and return the response payload
    ///
    /// `fields` are merged into the request body next to `subtype`.
    pub async fn send_control_request(
        &self,
        subtype: &str,
        mut fields: Map<String, Value>,
    ) -> Result<Value> {
        fields.insert("subtype".to_string(), Value::String(subtype.to_string()));
        self.control(&Value::Object(fields), subtype).await
    }

    async fn control<T: Serialize>(&self, request: &T, subtype: &str) -> Result<Value> {
        let request_id = RequestId::generate(self.counter.fetch_add(1, Ordering::SeqCst));
        let line = request_line(&request_id, request)?;
        debug!(request_id = %request_id, subtype, "sending control request");

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Control {
                request_id: request_id.clone(),
                line,
                reply,
            })
            .map_err(|_| AgentError::Disconnected)?;

        match tokio::time::timeout(self.control_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AgentError::Disconnected),
            Err(_) => {
                let _ = self.commands.send(Command::Cancel { request_id });
                Err(AgentError::Timeout(format!("{} response", subtype)))
            }
        }
    }

    /// Subscribe to conversation messages
    ///
    /// Messages received before the subscription are not replayed. A client
    /// that already ended yields a single [`ClientEvent::End`] carrying the
    /// reason it ended with.
    pub fn subscribe(&self) -> ClientStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(mpsc::error::SendError(Command::Subscribe(tx))) =
            self.commands.send(Command::Subscribe(tx))
        {
            let reason = self.end.borrow().clone().unwrap_or(EndReason::Stopped);
            let _ = tx.send(ClientEvent::End(reason));
        }
        ClientStream::new(rx)
    }

    /// Stop the client
    ///
    /// Cancels in-flight callbacks, closes the CLI, fails pending requests
    /// with [`AgentError::Disconnected`] and ends every subscription. Calling
    /// it again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}
