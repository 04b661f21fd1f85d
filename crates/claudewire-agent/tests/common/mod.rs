//! Shared helpers for agent integration tests

#![allow(dead_code)]

use claudewire_transport::ProcessConfig;
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write a shell script standing in for the CLI
pub fn stub_cli(body: &str) -> (NamedTempFile, ProcessConfig) {
    let mut file = NamedTempFile::new().expect("create stub script");
    writeln!(file, "{}", body).expect("write stub script");
    let config = ProcessConfig::new("/bin/sh")
        .with_arg(file.path().to_string_lossy().to_string())
        .with_close_grace(Duration::from_millis(500));
    (file, config)
}

/// Next stream item, failing the test after five seconds
pub async fn next<S>(stream: &mut S) -> Option<S::Item>
where
    S: Stream + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for stream item")
}

/// Drain a finite stream, failing the test if it stalls
pub async fn drain<S>(mut stream: S) -> Vec<S::Item>
where
    S: Stream + Unpin,
{
    let mut items = Vec::new();
    while let Some(item) = next(&mut stream).await {
        items.push(item);
    }
    items
}

/// A `control_request` line as the CLI would send it
pub fn control_request(request_id: &str, request: Value) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

/// `stream_event` envelope around a raw stream event
pub fn stream_event(event: Value) -> Value {
    json!({
        "type": "stream_event",
        "uuid": "evt",
        "session_id": "default",
        "event": event,
        "parent_tool_use_id": null,
    })
}

/// Stream events of a complete text message
pub fn text_message(chunks: &[&str]) -> Vec<Value> {
    let mut events = vec![
        stream_event(json!({"type": "message_start", "message": {}})),
        stream_event(json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""}
        })),
    ];
    for chunk in chunks {
        events.push(stream_event(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": chunk}
        })));
    }
    events.push(stream_event(json!({"type": "content_block_stop", "index": 0})));
    events.push(stream_event(json!({
        "type": "message_delta",
        "delta": {"stop_reason": "end_turn", "stop_sequence": null}
    })));
    events.push(stream_event(json!({"type": "message_stop"})));
    events
}
