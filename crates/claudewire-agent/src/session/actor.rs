//! Single-writer coordinator of a streaming session

use super::TurnEvent;
use crate::error::AgentError;
use crate::parser::parse_event;
use claudewire_protocol::{ControlResponse, Inbound, StreamEventKind, UserInput};
use claudewire_transport::{Transport, TransportEvent};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub(super) enum SessionCommand {
    Send {
        id: u64,
        input: UserInput,
        tx: mpsc::UnboundedSender<TurnEvent>,
    },
    Unsubscribe {
        id: u64,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<TurnEvent>,
}

struct Queued {
    subscriber: Subscriber,
    input: UserInput,
}

pub(super) struct SessionActor {
    transport: Arc<dyn Transport>,
    session_id: String,
    turn_timeout: Duration,
    /// Receives the current turn's events; `None` once it unsubscribed
    active: Option<Subscriber>,
    /// A turn is in flight, whether or not anyone still listens
    busy: bool,
    queue: VecDeque<Queued>,
    acc: String,
    /// Text of the current message across all of its blocks
    message_text: String,
    last_stop_reason: Option<String>,
    turn_deadline: Option<Instant>,
}

impl SessionActor {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        session_id: String,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            session_id,
            turn_timeout,
            active: None,
            busy: false,
            queue: VecDeque::new(),
            acc: String::new(),
            message_text: String::new(),
            last_stop_reason: None,
            turn_deadline: None,
        }
    }

    pub(super) async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        let mut close_reply = None;

        loop {
            let deadline = self.turn_deadline;
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Line(line)) => {
                        self.handle_line(&line).await;
                        if self.busy {
                            self.turn_deadline = Some(Instant::now() + self.turn_timeout);
                        }
                    }
                    Some(TransportEvent::Exited { code }) => {
                        debug!(code = ?code, "CLI exited during session");
                        break;
                    }
                    None => break,
                },
                command = commands.recv() => match command {
                    Some(SessionCommand::Send { id, input, tx }) => {
                        self.on_send(Subscriber { id, tx }, input).await;
                    }
                    Some(SessionCommand::Unsubscribe { id }) => self.on_unsubscribe(id),
                    Some(SessionCommand::Close { reply }) => {
                        close_reply = Some(reply);
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(timeout = ?self.turn_timeout, "turn timed out");
                    self.finish_turn(TurnEvent::TimedOut).await;
                }
            }
        }

        self.fail_all();
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "failed to close transport");
        }
        if let Some(reply) = close_reply {
            let _ = reply.send(());
        }
    }

    async fn on_send(&mut self, subscriber: Subscriber, input: UserInput) {
        if self.busy {
            debug!(id = subscriber.id, queued = self.queue.len() + 1, "turn in flight, queueing");
            self.queue.push_back(Queued { subscriber, input });
            return;
        }
        if !self.start_turn(subscriber, input).await {
            self.promote_next().await;
        }
    }

    fn on_unsubscribe(&mut self, id: u64) {
        if self.active.as_ref().is_some_and(|active| active.id == id) {
            debug!(id, "active subscriber left; turn continues");
            self.active = None;
            return;
        }
        self.queue.retain(|queued| queued.subscriber.id != id);
    }

    /// Write the subscriber's message and make it active
    ///
    /// Returns `false` if the write failed; the subscriber has then been told.
    async fn start_turn(&mut self, subscriber: Subscriber, input: UserInput) -> bool {
        self.acc.clear();
        self.message_text.clear();
        self.last_stop_reason = None;

        let frame = input.to_frame(&self.session_id);
        match self.transport.send_json(&frame).await {
            Ok(()) => {
                debug!(id = subscriber.id, "turn started");
                self.active = Some(subscriber);
                self.busy = true;
                self.turn_deadline = Some(Instant::now() + self.turn_timeout);
                true
            }
            Err(e) => {
                warn!(id = subscriber.id, error = %e, "failed to write message");
                let _ = subscriber.tx.send(TurnEvent::Error(e.into()));
                false
            }
        }
    }

    async fn promote_next(&mut self) {
        while let Some(Queued { subscriber, input }) = self.queue.pop_front() {
            if subscriber.tx.is_closed() {
                continue;
            }
            if self.start_turn(subscriber, input).await {
                return;
            }
        }
    }

    async fn finish_turn(&mut self, event: TurnEvent) {
        if let Some(active) = self.active.take() {
            let _ = active.tx.send(event);
        }
        self.busy = false;
        self.turn_deadline = None;
        self.acc.clear();
        self.message_text.clear();
        self.last_stop_reason = None;
        self.promote_next().await;
    }

    fn deliver(&mut self, event: TurnEvent) {
        if let Some(active) = &self.active {
            if active.tx.send(event).is_err() {
                self.active = None;
            }
        }
    }

    fn fail_all(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.tx.send(TurnEvent::Error(AgentError::Disconnected));
        }
        for queued in self.queue.drain(..) {
            let _ = queued
                .subscriber
                .tx
                .send(TurnEvent::Error(AgentError::Disconnected));
        }
        self.busy = false;
        self.turn_deadline = None;
    }

    async fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let inbound = match Inbound::parse_line(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(error = %e, "skipping undecodable line");
                return;
            }
        };

        match inbound {
            Inbound::ControlRequest {
                request_id,
                request,
            } => {
                warn!(request_id = %request_id, subtype = request.subtype(), "control request in a streaming session");
                let response = ControlResponse::error(
                    request_id,
                    "Control requests are not handled by streaming sessions",
                );
                match response.to_line() {
                    Ok(line) => {
                        if let Err(e) = self.transport.send_line(&line).await {
                            warn!(error = %e, "failed to write response");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode response"),
                }
            }
            Inbound::ControlResponse(response) => {
                debug!(request_id = %response.request_id(), "ignoring control response");
            }
            Inbound::ControlCancel { .. } => {}
            Inbound::Conversation(message) => self.on_message(message).await,
        }
    }

    async fn on_message(&mut self, message: Value) {
        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();

        if kind == "result" && message.get("is_error").and_then(Value::as_bool) == Some(true) {
            let reason = message
                .get("result")
                .and_then(Value::as_str)
                .or_else(|| message.get("subtype").and_then(Value::as_str))
                .unwrap_or("error result")
                .to_string();
            if self.busy {
                self.deliver(TurnEvent::Message(message));
                self.finish_turn(TurnEvent::Error(AgentError::TurnFailed(reason)))
                    .await;
            }
            return;
        }

        let (events, acc) = parse_event(&message, &self.acc);
        self.acc = acc;

        if events.is_empty() {
            if kind != "stream_event" {
                self.deliver(TurnEvent::Message(message));
            }
            return;
        }

        for event in events {
            trace!(kind = ?event.kind, "stream event");
            match &event.kind {
                StreamEventKind::MessageStart => {
                    self.last_stop_reason = None;
                    self.message_text.clear();
                }
                StreamEventKind::MessageDelta {
                    stop_reason: Some(reason),
                    ..
                } => self.last_stop_reason = Some(reason.clone()),
                // the parser resets its accumulation at every block boundary
                StreamEventKind::ContentBlockStop { final_text }
                | StreamEventKind::MessageStop { final_text, .. } => {
                    self.message_text.push_str(final_text)
                }
                _ => {}
            }

            let terminal = match &event.kind {
                StreamEventKind::MessageStop { .. }
                    if self.last_stop_reason.as_deref() != Some("tool_use") =>
                {
                    Some(TurnEvent::Completed {
                        final_text: self.message_text.clone(),
                        stop_reason: self.last_stop_reason.clone(),
                    })
                }
                StreamEventKind::Error { error } => Some(TurnEvent::Error(
                    AgentError::TurnFailed(error.to_string()),
                )),
                _ => None,
            };

            self.deliver(TurnEvent::Stream(event));
            if let Some(terminal) = terminal {
                if self.busy {
                    self.finish_turn(terminal).await;
                }
            }
        }
    }
}
