//! Streaming event parser
//!
//! Turns the raw model stream (`message_start`, `content_block_delta`, ...)
//! into typed [`StreamEvent`]s while tracking the accumulated text of the
//! in-flight message. Both entry points are pure: state goes in and comes out.

use claudewire_protocol::{BlockKind, CategorizedError, StreamEvent, StreamEventKind};
use serde_json::Value;
use tracing::{debug, trace};

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Parse one decoded JSON object
///
/// Returns the events it produces and the new accumulated text. A
/// `stream_event` envelope is unwrapped first and its `parent_tool_use_id` is
/// attached to every resulting event. Unknown event types produce nothing and
/// leave the accumulation untouched.
///
/// ```
/// use claudewire_agent::parser::parse_event;
/// use serde_json::json;
///
/// let delta = json!({
///     "type": "content_block_delta",
///     "delta": {"type": "text_delta", "text": "Hi"}
/// });
/// let (events, acc) = parse_event(&delta, "Oh, ");
/// assert_eq!(events.len(), 1);
/// assert_eq!(acc, "Oh, Hi");
/// ```
pub fn parse_event(json: &Value, acc_text: &str) -> (Vec<StreamEvent>, String) {
    let (event, parent, envelope) = if str_field(json, "type") == Some("stream_event") {
        let parent = str_field(json, "parent_tool_use_id").map(str::to_string);
        (json.get("event").unwrap_or(&Value::Null), parent, Some(json))
    } else {
        (json, None, None)
    };

    let mut acc = acc_text.to_string();
    let kinds = match str_field(event, "type").unwrap_or_default() {
        "message_start" => {
            acc.clear();
            vec![StreamEventKind::MessageStart]
        }
        "content_block_start" => {
            let block_type = event
                .get("content_block")
                .and_then(|block| str_field(block, "type"))
                .unwrap_or("unknown");
            let kind = BlockKind::from_type(block_type);
            if let BlockKind::Unknown(name) = &kind {
                debug!(block_type = %name, "Unknown content block kind");
            }
            vec![StreamEventKind::ContentBlockStart { kind }]
        }
        "content_block_delta" => {
            let delta = event.get("delta").unwrap_or(&Value::Null);
            match str_field(delta, "type").unwrap_or_default() {
                "text_delta" => {
                    let text = str_field(delta, "text").unwrap_or_default().to_string();
                    acc.push_str(&text);
                    vec![StreamEventKind::TextDelta {
                        text,
                        accumulated: acc.clone(),
                    }]
                }
                "input_json_delta" => vec![StreamEventKind::InputJsonDelta {
                    partial_json: str_field(delta, "partial_json")
                        .unwrap_or_default()
                        .to_string(),
                }],
                "thinking_delta" => vec![StreamEventKind::ThinkingDelta {
                    thinking: str_field(delta, "thinking").unwrap_or_default().to_string(),
                }],
                other => {
                    trace!(delta_type = other, "Ignoring delta");
                    Vec::new()
                }
            }
        }
        "content_block_stop" => vec![StreamEventKind::ContentBlockStop {
            final_text: std::mem::take(&mut acc),
        }],
        "message_delta" => {
            let delta = event.get("delta").unwrap_or(&Value::Null);
            let stop_reason = str_field(delta, "stop_reason").map(str::to_string);
            if let Some(reason) = &stop_reason {
                debug!(stop_reason = %reason, "Message stopping");
            }
            vec![StreamEventKind::MessageDelta {
                stop_reason,
                stop_sequence: str_field(delta, "stop_sequence").map(str::to_string),
            }]
        }
        "message_stop" => {
            let from_envelope = |key: &str| present(envelope.and_then(|e| e.get(key)));
            let structured_output = present(event.get("structured_output"))
                .or_else(|| from_envelope("structured_output"))
                .cloned();
            let error = present(event.get("error"))
                .or_else(|| from_envelope("error"))
                .map(CategorizedError::from_value);
            vec![StreamEventKind::MessageStop {
                final_text: std::mem::take(&mut acc),
                structured_output,
                error,
            }]
        }
        "error" => vec![StreamEventKind::Error {
            error: CategorizedError::from_value(event),
        }],
        other => {
            trace!(event_type = other, "Ignoring stream event");
            return (Vec::new(), acc_text.to_string());
        }
    };

    let events = kinds
        .into_iter()
        .map(|kind| StreamEvent {
            kind,
            parent_tool_use_id: parent.clone(),
        })
        .collect();
    (events, acc)
}

/// Parse every complete line of a raw buffer
///
/// Returns the events, the trailing incomplete fragment to prepend to the next
/// fill, and the new accumulated text. Blank and malformed lines are skipped.
pub fn parse_buffer(raw: &str, acc_text: &str) -> (Vec<StreamEvent>, String, String) {
    let (complete, remainder) = match raw.rfind('\n') {
        Some(end) => (&raw[..end], &raw[end + 1..]),
        None => ("", raw),
    };

    let mut events = Vec::new();
    let mut acc = acc_text.to_string();
    for line in complete.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                let (mut parsed, next) = parse_event(&value, &acc);
                events.append(&mut parsed);
                acc = next;
            }
            Err(e) => debug!(error = %e, "Skipping malformed stream line"),
        }
    }

    (events, remainder.to_string(), acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claudewire_protocol::ErrorCategory;
    use serde_json::json;

    fn text_delta(text: &str) -> Value {
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}})
    }

    fn fold(values: &[Value]) -> (Vec<StreamEvent>, String) {
        let mut acc = String::new();
        let mut events = Vec::new();
        for value in values {
            let (mut parsed, next) = parse_event(value, &acc);
            events.append(&mut parsed);
            acc = next;
        }
        (events, acc)
    }

    #[test]
    fn test_accumulates_text_deltas() {
        let (events, acc) = fold(&[
            json!({"type": "message_start", "message": {}}),
            text_delta("Hel"),
            text_delta("lo"),
            text_delta(" Wor"),
            text_delta("ld"),
            json!({"type": "message_stop"}),
        ]);

        assert_eq!(events.len(), 6);
        assert_eq!(
            events[2].kind,
            StreamEventKind::TextDelta {
                text: "lo".to_string(),
                accumulated: "Hello".to_string()
            }
        );
        assert_eq!(events[5].final_text(), Some("Hello World"));
        assert_eq!(acc, "");
    }

    #[test]
    fn test_block_stop_resets_accumulation() {
        let (events, _) = fold(&[
            text_delta("first"),
            json!({"type": "content_block_stop", "index": 0}),
            text_delta("second"),
            json!({"type": "message_stop"}),
        ]);

        assert_eq!(
            events[1].kind,
            StreamEventKind::ContentBlockStop {
                final_text: "first".to_string()
            }
        );
        assert_eq!(events[3].final_text(), Some("second"));
    }

    #[test]
    fn test_message_start_resets_accumulation() {
        let (events, acc) = parse_event(&json!({"type": "message_start"}), "stale");
        assert_eq!(events.len(), 1);
        assert_eq!(acc, "");
    }

    #[test]
    fn test_non_text_deltas_leave_accumulation() {
        let (events, acc) = fold(&[
            text_delta("a"),
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{\"x\":"}}),
            json!({"type": "content_block_delta", "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            json!({"type": "content_block_delta", "delta": {"type": "signature_delta", "signature": "s"}}),
        ]);

        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1].kind,
            StreamEventKind::InputJsonDelta {
                partial_json: "{\"x\":".to_string()
            }
        );
        assert_eq!(
            events[2].kind,
            StreamEventKind::ThinkingDelta {
                thinking: "hmm".to_string()
            }
        );
        assert_eq!(acc, "a");
    }

    #[test]
    fn test_stream_event_envelope_sets_parent() {
        let envelope = json!({
            "type": "stream_event",
            "uuid": "u1",
            "session_id": "s1",
            "parent_tool_use_id": "toolu_9",
            "event": {"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use"}}
        });
        let (events, _) = parse_event(&envelope, "");

        assert_eq!(events[0].parent_tool_use_id.as_deref(), Some("toolu_9"));
        assert_eq!(
            events[0].kind,
            StreamEventKind::ContentBlockStart {
                kind: BlockKind::ToolUse
            }
        );

        let (events, _) = parse_event(
            &json!({"type": "stream_event", "parent_tool_use_id": null, "event": {"type": "message_start"}}),
            "",
        );
        assert_eq!(events[0].parent_tool_use_id, None);
    }

    #[test]
    fn test_unknown_types_are_ignored() {
        let (events, acc) = parse_event(&json!({"type": "ping"}), "keep");
        assert!(events.is_empty());
        assert_eq!(acc, "keep");

        let (events, acc) = parse_event(&json!({"type": "assistant", "message": {}}), "keep");
        assert!(events.is_empty());
        assert_eq!(acc, "keep");
    }

    #[test]
    fn test_unknown_block_kind_is_reported() {
        let (events, _) = parse_event(
            &json!({"type": "content_block_start", "content_block": {"type": "server_tool_use"}}),
            "",
        );
        assert_eq!(
            events[0].kind,
            StreamEventKind::ContentBlockStart {
                kind: BlockKind::Unknown("server_tool_use".to_string())
            }
        );
    }

    #[test]
    fn test_message_delta_metadata() {
        let (events, acc) = parse_event(
            &json!({"type": "message_delta", "delta": {"stop_reason": "tool_use", "stop_sequence": null}}),
            "x",
        );
        assert_eq!(
            events[0].kind,
            StreamEventKind::MessageDelta {
                stop_reason: Some("tool_use".to_string()),
                stop_sequence: None
            }
        );
        assert_eq!(acc, "x");
    }

    #[test]
    fn test_message_stop_extras_from_envelope() {
        let envelope = json!({
            "type": "stream_event",
            "event": {"type": "message_stop"},
            "structured_output": {"answer": 42},
            "error": {"type": "rate_limit_error", "message": "slow down"}
        });
        let (events, _) = parse_event(&envelope, "done");

        match &events[0].kind {
            StreamEventKind::MessageStop {
                final_text,
                structured_output,
                error,
            } => {
                assert_eq!(final_text, "done");
                assert_eq!(structured_output, &Some(json!({"answer": 42})));
                let error = error.as_ref().unwrap();
                assert_eq!(error.category, ErrorCategory::RateLimit);
                assert_eq!(error.message, "slow down");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_message_stop_prefers_event_fields() {
        let envelope = json!({
            "type": "stream_event",
            "event": {"type": "message_stop", "structured_output": {"from": "event"}},
            "structured_output": {"from": "envelope"}
        });
        let (events, _) = parse_event(&envelope, "");

        match &events[0].kind {
            StreamEventKind::MessageStop {
                structured_output, ..
            } => assert_eq!(structured_output, &Some(json!({"from": "event"}))),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_error_event() {
        let (events, _) = parse_event(
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            "",
        );
        assert_eq!(
            events[0].kind,
            StreamEventKind::Error {
                error: CategorizedError {
                    category: ErrorCategory::Overloaded,
                    message: "Overloaded".to_string()
                }
            }
        );
    }

    #[test]
    fn test_parse_buffer_keeps_remainder() {
        let raw = format!(
            "{}\nnot json\n\n{}\n{{\"type\":\"content_",
            text_delta("ab"),
            text_delta("cd")
        );
        let (events, remainder, acc) = parse_buffer(&raw, "");

        assert_eq!(events.len(), 2);
        assert_eq!(remainder, "{\"type\":\"content_");
        assert_eq!(acc, "abcd");

        let next = format!("{}block_stop\"}}\n", remainder);
        let (events, remainder, acc) = parse_buffer(&next, &acc);
        assert_eq!(events[0].kind, StreamEventKind::ContentBlockStop { final_text: "abcd".to_string() });
        assert_eq!(remainder, "");
        assert_eq!(acc, "");
    }

    #[test]
    fn test_parse_buffer_without_newline() {
        let (events, remainder, acc) = parse_buffer("{\"type\":", "keep");
        assert!(events.is_empty());
        assert_eq!(remainder, "{\"type\":");
        assert_eq!(acc, "keep");
    }
}
