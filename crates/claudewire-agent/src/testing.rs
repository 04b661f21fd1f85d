//! Testing utilities
//!
//! [`MockTransport`] stands in for a CLI process: tests push the lines the CLI
//! would print and inspect the lines the client wrote.

use claudewire_transport::{Result as TransportResult, Transport, TransportError, TransportEvent};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

#[derive(Default)]
struct MockState {
    subscribers: Vec<mpsc::UnboundedSender<TransportEvent>>,
    sent: Vec<String>,
    exited: Option<Option<i32>>,
    closed: bool,
    auto_initialize: bool,
}

impl MockState {
    fn broadcast(&mut self, event: TransportEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn finish(&mut self, code: Option<i32>) {
        if self.exited.is_some() {
            return;
        }
        self.broadcast(TransportEvent::Exited { code });
        self.subscribers.clear();
        self.exited = Some(code);
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<MockState>,
    sent: Notify,
}

/// In-memory transport for tests
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockTransport")
            .field("sent", &state.sent.len())
            .field("exited", &state.exited)
            .field("closed", &state.closed)
            .finish()
    }
}

impl MockTransport {
    /// Create a mock that answers nothing on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that answers every `initialize` request with success
    pub fn auto_initialize() -> Self {
        let mock = Self::new();
        mock.state().auto_initialize = true;
        mock
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver a line as if the CLI printed it
    pub fn push_line(&self, line: impl Into<String>) {
        self.state().broadcast(TransportEvent::Line(line.into()));
    }

    /// Deliver a JSON value as one line
    pub fn push_json(&self, value: &Value) {
        self.push_line(value.to_string());
    }

    /// Deliver a successful `control_response`
    pub fn respond(&self, request_id: &str, response: Value) {
        self.push_json(&json!({
            "type": "control_response",
            "response": {"subtype": "success", "request_id": request_id, "response": response}
        }));
    }

    /// Simulate the CLI exiting
    pub fn exit(&self, code: Option<i32>) {
        self.state().finish(code);
    }

    /// Lines written so far, without trailing newlines
    pub fn sent_lines(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Written lines that decode as JSON
    pub fn sent_json(&self) -> Vec<Value> {
        self.sent_lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Wait until at least `count` lines were written, for up to five seconds
    ///
    /// Returns the decoded lines written by then, possibly fewer than `count`.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let notified = self.inner.sent.notified();
            if self.state().sent.len() >= count {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }
        self.sent_json()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

fn initialize_request_id(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value["type"] != "control_request" || value["request"]["subtype"] != "initialize" {
        return None;
    }
    value["request_id"].as_str().map(str::to_string)
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send_line(&self, line: &str) -> TransportResult<()> {
        let line = line.trim_end_matches('\n').to_string();
        let auto_reply = {
            let mut state = self.state();
            if state.closed || state.exited.is_some() {
                return Err(TransportError::Closed);
            }
            state.sent.push(line.clone());
            state.auto_initialize
        };
        self.inner.sent.notify_waiters();

        if auto_reply {
            if let Some(request_id) = initialize_request_id(&line) {
                self.respond(&request_id, json!({}));
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        match state.exited {
            Some(code) => {
                let _ = tx.send(TransportEvent::Exited { code });
            }
            None => state.subscribers.push(tx),
        }
        rx
    }

    async fn close(&self) -> TransportResult<()> {
        let mut state = self.state();
        state.closed = true;
        state.finish(None);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let state = self.state();
        !state.closed && state.exited.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_sent_lines() {
        let mock = MockTransport::new();
        mock.send_line("{\"a\":1}\n").await.unwrap();
        mock.send_line("not json").await.unwrap();

        assert_eq!(mock.sent_lines(), vec!["{\"a\":1}", "not json"]);
        assert_eq!(mock.sent_json(), vec![json!({"a": 1})]);
    }

    #[tokio::test]
    async fn test_auto_initialize_replies() {
        let mock = MockTransport::auto_initialize();
        let mut rx = mock.subscribe();

        mock.send_line(r#"{"type":"control_request","request_id":"req_0_abc","request":{"subtype":"initialize"}}"#)
            .await
            .unwrap();

        let TransportEvent::Line(line) = rx.recv().await.unwrap() else {
            panic!("expected a line");
        };
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(reply["response"]["request_id"], "req_0_abc");
        assert_eq!(reply["response"]["subtype"], "success");
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_once() {
        let mock = MockTransport::new();
        let mut rx = mock.subscribe();

        mock.close().await.unwrap();
        mock.close().await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Exited { code: None }));
        assert_eq!(rx.recv().await, None);
        assert!(mock.send_line("{}").await.is_err());
        assert!(!mock.is_alive());
    }
}
