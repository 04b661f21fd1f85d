//! Coordinator loop of the control client
//!
//! One task owns the transport subscription, the pending-request table, the
//! in-flight callback tokens and the subscriber list. Handles talk to it
//! through [`Command`]s; spawned callbacks report back through
//! [`Completion`]s.

use super::dispatch::{Completion, spawn_bounded};
use super::{ClientEvent, ClientState, EndReason};
use crate::config::ClientConfig;
use crate::error::{AgentError, Result};
use crate::hooks::{HookContext, HookRegistry};
use crate::mcp::bridge;
use crate::permissions::ToolPermissionContext;
use claudewire_protocol::control::request_line;
use claudewire_protocol::{
    CanUseToolRequest, ControlRequest, ControlResponse, HookCallbackRequest, Inbound,
    McpMessageRequest, OutboundRequest, RequestId, UserInput,
};
use claudewire_transport::{Transport, TransportEvent};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

type Waiter = oneshot::Sender<Result<Value>>;

/// Handshake outcome shared with handles; `None` until settled
pub(super) type Handshake = watch::Sender<Option<Result<()>>>;

fn settle(handshake: &Handshake, outcome: Result<()>) {
    handshake.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(outcome);
        true
    });
}

/// Attribute a callback's error to the callback without wrapping it twice
fn callback_failure(err: AgentError) -> AgentError {
    match err {
        err @ AgentError::CallbackExecution(_) => err,
        other => AgentError::CallbackExecution(other.to_string()),
    }
}

/// Requests from client handles to the coordinator
pub(super) enum Command {
    SendMessage {
        input: UserInput,
        reply: oneshot::Sender<Result<()>>,
    },
    Control {
        request_id: RequestId,
        line: String,
        reply: Waiter,
    },
    Cancel {
        request_id: RequestId,
    },
    Subscribe(mpsc::UnboundedSender<ClientEvent>),
    Stop {
        reply: oneshot::Sender<()>,
    },
}

pub(super) struct ClientActor {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    registry: HookRegistry,
    timeouts: HashMap<String, Duration>,
    state: watch::Sender<ClientState>,
    end: watch::Sender<Option<EndReason>>,
    counter: Arc<AtomicU64>,
    pending: HashMap<RequestId, Waiter>,
    inflight: HashMap<RequestId, CancellationToken>,
    subscribers: Vec<mpsc::UnboundedSender<ClientEvent>>,
    root: CancellationToken,
    completions: mpsc::UnboundedSender<Completion>,
}

impl ClientActor {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        state: watch::Sender<ClientState>,
        end: watch::Sender<Option<EndReason>>,
        counter: Arc<AtomicU64>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self {
            transport,
            config,
            registry: HookRegistry::new(),
            timeouts: HashMap::new(),
            state,
            end,
            counter,
            pending: HashMap::new(),
            inflight: HashMap::new(),
            subscribers: Vec::new(),
            root: CancellationToken::new(),
            completions,
        }
    }

    /// Drive the client until it stops
    ///
    /// `handshake` is settled exactly once.
    pub(super) async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        handshake: Handshake,
    ) {
        let mut stop_replies = Vec::new();

        self.set_state(ClientState::Connecting);
        let (init_tx, mut init_rx) = oneshot::channel();
        if let Err(e) = self.start_handshake(init_tx).await {
            let reason = EndReason::HandshakeFailed(e.to_string());
            settle(&handshake, Err(AgentError::HandshakeFailed(e.to_string())));
            self.shutdown(reason).await;
            self.drain(&mut commands, stop_replies);
            return;
        }
        self.set_state(ClientState::Initializing);

        let deadline = tokio::time::sleep(self.config.initialize_timeout);
        tokio::pin!(deadline);
        let mut handshaking = true;

        let reason = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Line(line)) => self.handle_line(&line).await,
                    Some(TransportEvent::Exited { code }) => {
                        debug!(code = ?code, "CLI exited");
                        break EndReason::ProcessExited { code };
                    }
                    None => break EndReason::ProcessExited { code: None },
                },
                command = commands.recv() => match command {
                    Some(Command::Stop { reply }) => {
                        stop_replies.push(reply);
                        break EndReason::Stopped;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break EndReason::Stopped,
                },
                Some(completion) = completions.recv() => self.complete(completion).await,
                result = &mut init_rx, if handshaking => {
                    handshaking = false;
                    let outcome = match result {
                        Ok(Ok(_)) => Ok(()),
                        Ok(Err(e)) => Err(AgentError::HandshakeFailed(e.to_string())),
                        Err(_) => Err(AgentError::HandshakeFailed(
                            "initialize request was dropped".to_string(),
                        )),
                    };
                    match outcome {
                        Ok(()) => {
                            debug!(callbacks = self.registry.len(), "handshake complete");
                            self.set_state(ClientState::Ready);
                            settle(&handshake, Ok(()));
                        }
                        Err(e) => {
                            warn!(error = %e, "handshake rejected");
                            let reason = EndReason::HandshakeFailed(e.to_string());
                            settle(&handshake, Err(e));
                            break reason;
                        }
                    }
                }
                _ = &mut deadline, if handshaking => {
                    let e = AgentError::Timeout("initialize response".to_string());
                    warn!(timeout = ?self.config.initialize_timeout, "handshake timed out");
                    let reason = EndReason::HandshakeFailed(e.to_string());
                    settle(&handshake, Err(e));
                    break reason;
                }
            }
        };

        settle(
            &handshake,
            Err(AgentError::HandshakeFailed(format!(
                "client ended before the handshake completed: {}",
                reason
            ))),
        );

        self.shutdown(reason).await;
        self.drain(&mut commands, stop_replies);
    }

    /// Answer commands that raced the shutdown, then refuse new ones
    fn drain(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        mut stop_replies: Vec<oneshot::Sender<()>>,
    ) {
        commands.close();
        let reason = self.end.borrow().clone().unwrap_or(EndReason::Stopped);
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Subscribe(tx) => {
                    let _ = tx.send(ClientEvent::End(reason.clone()));
                }
                Command::Stop { reply } => stop_replies.push(reply),
                Command::SendMessage { reply, .. } => {
                    let _ = reply.send(Err(AgentError::Disconnected));
                }
                Command::Control { reply, .. } => {
                    let _ = reply.send(Err(AgentError::Disconnected));
                }
                Command::Cancel { .. } => {}
            }
        }
        for reply in stop_replies {
            let _ = reply.send(());
        }
    }

    fn set_state(&self, state: ClientState) {
        trace!(state = ?state, "client state");
        self.state.send_replace(state);
    }

    fn is_ready(&self) -> bool {
        *self.state.borrow() == ClientState::Ready
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::generate(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn start_handshake(&mut self, init_tx: Waiter) -> Result<()> {
        let registered = self.registry.register_config(&self.config.hooks);
        self.timeouts = registered.timeouts;
        let hooks = (!registered.payload.is_empty()).then_some(registered.payload);

        let request_id = self.next_request_id();
        let line = request_line(&request_id, &OutboundRequest::Initialize { hooks })?;
        debug!(request_id = %request_id, callbacks = self.registry.len(), "sending initialize");

        self.pending.insert(request_id.clone(), init_tx);
        if let Err(e) = self.transport.send_line(&line).await {
            self.pending.remove(&request_id);
            return Err(e.into());
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let inbound = match Inbound::parse_line(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "skipping undecodable line");
                return;
            }
        };

        match inbound {
            Inbound::ControlRequest {
                request_id,
                request,
            } => self.dispatch(request_id, request).await,
            Inbound::ControlResponse(response) => self.resolve(response),
            Inbound::ControlCancel { request_id } => {
                if let Some(token) = self.inflight.remove(&request_id) {
                    debug!(request_id = %request_id, "CLI cancelled request");
                    token.cancel();
                }
            }
            Inbound::Conversation(message) => self.broadcast(ClientEvent::Message(message)),
        }
    }

    async fn dispatch(&mut self, request_id: RequestId, request: ControlRequest) {
        debug!(request_id = %request_id, subtype = request.subtype(), "control request");

        match request {
            ControlRequest::HookCallback(request) => self.run_hook(request_id, request).await,
            ControlRequest::CanUseTool(request) => self.run_permission(request_id, request).await,
            ControlRequest::McpMessage(request) => self.run_mcp(request_id, request),
            ControlRequest::Unknown { subtype } => {
                let error = format!("Unsupported control request subtype: {}", subtype);
                self.respond(ControlResponse::error(request_id, error)).await;
            }
            ControlRequest::Malformed { subtype, reason } => {
                warn!(request_id = %request_id, subtype = %subtype, reason = %reason, "malformed control request");
                let error = format!("Malformed {} request: {}", subtype, reason);
                self.respond(ControlResponse::error(request_id, error)).await;
            }
        }
    }

    fn track(&mut self, request_id: &RequestId) -> CancellationToken {
        let token = self.root.child_token();
        self.inflight.insert(request_id.clone(), token.clone());
        token
    }

    async fn run_hook(&mut self, request_id: RequestId, request: HookCallbackRequest) {
        let HookCallbackRequest {
            callback_id,
            input,
            tool_use_id,
        } = request;

        let callback = match self.registry.lookup(&callback_id) {
            Ok(callback) => callback,
            Err(e) => {
                warn!(request_id = %request_id, callback_id = %callback_id, "unknown hook callback");
                self.respond(ControlResponse::error(request_id, e.to_string()))
                    .await;
                return;
            }
        };

        let limit = self
            .timeouts
            .get(&callback_id)
            .copied()
            .unwrap_or(self.config.callback_timeout);
        let token = self.track(&request_id);
        let ctx = HookContext {
            request_id: request_id.clone(),
            cancellation: token.clone(),
        };

        let work = async move {
            let output = callback(input, tool_use_id, ctx)
                .await
                .map_err(callback_failure)?;
            Ok::<_, AgentError>(serde_json::to_value(output)?)
        };
        spawn_bounded(
            request_id,
            callback_id,
            limit,
            token,
            work,
            self.completions.clone(),
        );
    }

    async fn run_permission(&mut self, request_id: RequestId, request: CanUseToolRequest) {
        let Some(callback) = self.config.can_use_tool.clone() else {
            warn!(request_id = %request_id, tool = %request.tool_name, "no permission callback configured");
            let error = format!("No permission callback configured for {}", request.tool_name);
            self.respond(ControlResponse::error(request_id, error)).await;
            return;
        };

        let CanUseToolRequest {
            tool_name,
            input,
            permission_suggestions,
            blocked_path,
        } = request;

        let token = self.track(&request_id);
        let ctx = ToolPermissionContext {
            request_id: request_id.clone(),
            suggestions: permission_suggestions,
            blocked_path,
            cancellation: token.clone(),
        };
        let label = format!("can_use_tool:{}", tool_name);

        let work = async move {
            let decision = callback(tool_name, input.clone(), ctx)
                .await
                .map_err(callback_failure)?;
            Ok::<_, AgentError>(serde_json::to_value(decision.with_default_input(&input))?)
        };
        spawn_bounded(
            request_id,
            label,
            self.config.tool_timeout,
            token,
            work,
            self.completions.clone(),
        );
    }

    fn run_mcp(&mut self, request_id: RequestId, request: McpMessageRequest) {
        let McpMessageRequest {
            server_name,
            message,
        } = request;
        let server = self.config.sdk_servers.get(&server_name).cloned();
        let label = format!("{}:{}", server_name, message.method);

        let token = self.track(&request_id);
        let work = async move {
            let response = bridge::handle_request(&server_name, server, message).await;
            let response = serde_json::to_value(response)?;
            Ok::<_, AgentError>(json!({ "mcp_response": response }))
        };
        spawn_bounded(
            request_id,
            label,
            self.config.tool_timeout,
            token,
            work,
            self.completions.clone(),
        );
    }

    async fn complete(&mut self, completion: Completion) {
        if self.inflight.remove(&completion.request_id).is_none() {
            debug!(request_id = %completion.request_id, "dropping response for cancelled request");
            return;
        }
        self.respond(completion.response).await;
    }

    async fn respond(&self, response: ControlResponse) {
        let line = match response.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(request_id = %response.request_id(), error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = self.transport.send_line(&line).await {
            warn!(request_id = %response.request_id(), error = %e, "failed to write response");
        }
    }

    fn resolve(&mut self, response: ControlResponse) {
        let Some(waiter) = self.pending.remove(response.request_id()) else {
            debug!(request_id = %response.request_id(), "response for unknown request");
            return;
        };

        let result = match response {
            ControlResponse::Success { response, .. } => Ok(response.unwrap_or(Value::Null)),
            ControlResponse::Error { error, .. } => Err(AgentError::Control(error)),
        };
        let _ = waiter.send(result);
    }

    fn broadcast(&mut self, event: ClientEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage { input, reply } => {
                let result = if self.is_ready() {
                    let frame = input.to_frame(&self.config.session_id);
                    self.transport
                        .send_json(&frame)
                        .await
                        .map_err(AgentError::from)
                } else {
                    Err(AgentError::NotConnected)
                };
                let _ = reply.send(result);
            }
            Command::Control {
                request_id,
                line,
                reply,
            } => {
                if !self.is_ready() {
                    let _ = reply.send(Err(AgentError::NotConnected));
                    return;
                }
                match self.transport.send_line(&line).await {
                    Ok(()) => {
                        self.pending.insert(request_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            Command::Cancel { request_id } => {
                self.pending.remove(&request_id);
            }
            Command::Subscribe(tx) => self.subscribers.push(tx),
            // handled by the loop
            Command::Stop { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn shutdown(&mut self, reason: EndReason) {
        debug!(reason = %reason, pending = self.pending.len(), inflight = self.inflight.len(), "client shutting down");

        self.root.cancel();
        self.inflight.clear();

        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "failed to close transport");
        }

        for (_, waiter) in self.pending.drain() {
            let _ = waiter.send(Err(AgentError::Disconnected));
        }
        self.end.send_replace(Some(reason.clone()));
        self.broadcast(ClientEvent::End(reason));
        self.subscribers.clear();
        self.set_state(ClientState::Terminated);
    }
}
