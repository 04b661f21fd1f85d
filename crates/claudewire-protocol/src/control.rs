//! Control-protocol envelopes
//!
//! Every line the CLI writes is one JSON object discriminated by its `type`
//! field. Three types belong to the control protocol:
//!
//! - `control_request`: the CLI asks the client to do something (run a hook,
//!   decide a permission, answer a JSON-RPC call)
//! - `control_response`: the CLI answers a request the client issued
//! - `control_cancel_request`: the CLI abandons a request it issued earlier
//!
//! Everything else is a conversation message and is passed through untouched.

use crate::error::{ProtocolError, Result};
use crate::hooks::{HookInput, HookMatcherConfig};
use crate::jsonrpc::JsonRpcRequest;
use crate::types::{PermissionMode, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A classified inbound line
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Request from the CLI that expects exactly one response
    ControlRequest {
        /// Id to echo in the response
        request_id: RequestId,
        /// The decoded request
        request: ControlRequest,
    },

    /// Response to a request the client issued
    ControlResponse(ControlResponse),

    /// The CLI no longer needs an answer to one of its requests
    ControlCancel {
        /// Id of the abandoned request
        request_id: RequestId,
    },

    /// Opaque conversation message
    Conversation(Value),
}

impl Inbound {
    /// Decode and classify one line
    pub fn parse_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::classify(value)
    }

    /// Classify a decoded JSON value
    ///
    /// ```
    /// use claudewire_protocol::Inbound;
    /// use serde_json::json;
    ///
    /// let inbound = Inbound::classify(json!({"type": "assistant", "message": {}})).unwrap();
    /// assert!(matches!(inbound, Inbound::Conversation(_)));
    /// ```
    pub fn classify(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::InvalidMessage(format!(
                    "expected a JSON object, got {}",
                    other
                )));
            }
        };

        match map.get("type").and_then(Value::as_str) {
            Some("control_request") => {
                let request_id = take_request_id(&mut map)?;
                let request = map
                    .remove("request")
                    .ok_or(ProtocolError::MissingField("request"))?;
                Ok(Self::ControlRequest {
                    request_id,
                    request: ControlRequest::from_value(request),
                })
            }
            Some("control_response") => {
                let response = map
                    .remove("response")
                    .ok_or(ProtocolError::MissingField("response"))?;
                Ok(Self::ControlResponse(serde_json::from_value(response)?))
            }
            Some("control_cancel_request") => Ok(Self::ControlCancel {
                request_id: take_request_id(&mut map)?,
            }),
            _ => Ok(Self::Conversation(Value::Object(map))),
        }
    }
}

fn take_request_id(map: &mut Map<String, Value>) -> Result<RequestId> {
    match map.remove("request_id") {
        Some(Value::String(id)) => Ok(RequestId::from_string(id)),
        _ => Err(ProtocolError::MissingField("request_id")),
    }
}

/// Request issued by the CLI
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    /// Invoke a registered hook callback
    HookCallback(HookCallbackRequest),

    /// Decide whether a tool may run
    CanUseTool(CanUseToolRequest),

    /// JSON-RPC call to an in-process tool server
    McpMessage(McpMessageRequest),

    /// A subtype this client does not handle
    Unknown {
        /// The subtype as received
        subtype: String,
    },

    /// A known subtype whose payload did not decode
    Malformed {
        /// The subtype as received
        subtype: String,
        /// Decode failure
        reason: String,
    },
}

impl ControlRequest {
    /// Decode the `request` object of a control envelope
    pub fn from_value(request: Value) -> Self {
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let decoded = match subtype.as_str() {
            "hook_callback" => serde_json::from_value(request).map(Self::HookCallback),
            "can_use_tool" => serde_json::from_value(request).map(Self::CanUseTool),
            "sdk_mcp_request" | "mcp_message" => {
                serde_json::from_value(request).map(Self::McpMessage)
            }
            _ => return Self::Unknown { subtype },
        };

        decoded.unwrap_or_else(|e| Self::Malformed {
            subtype,
            reason: e.to_string(),
        })
    }

    /// Subtype name for logging
    pub fn subtype(&self) -> &str {
        match self {
            Self::HookCallback(_) => "hook_callback",
            Self::CanUseTool(_) => "can_use_tool",
            Self::McpMessage(_) => "sdk_mcp_request",
            Self::Unknown { subtype } | Self::Malformed { subtype, .. } => subtype,
        }
    }
}

/// Payload of a `hook_callback` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCallbackRequest {
    /// Id assigned to the callback during the handshake
    pub callback_id: String,

    /// Event input
    #[serde(default)]
    pub input: HookInput,

    /// Tool use the event relates to
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

/// Payload of a `can_use_tool` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanUseToolRequest {
    /// Tool the model wants to run
    pub tool_name: String,

    /// Proposed tool input
    #[serde(default)]
    pub input: Value,

    /// Permission updates the CLI suggests
    #[serde(default)]
    pub permission_suggestions: Vec<Value>,

    /// Path that triggered the check, if any
    #[serde(default)]
    pub blocked_path: Option<String>,
}

/// Payload of an `sdk_mcp_request` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpMessageRequest {
    /// Name of the in-process server
    #[serde(rename = "serverName", alias = "server_name")]
    pub server_name: String,

    /// The JSON-RPC message
    pub message: JsonRpcRequest,
}

/// Response half of a control exchange, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponse {
    /// The request succeeded
    Success {
        /// Id of the request being answered
        request_id: RequestId,
        /// Result payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },

    /// The request failed
    Error {
        /// Id of the request being answered
        request_id: RequestId,
        /// Failure reason
        error: String,
    },
}

#[derive(Serialize)]
struct ResponseFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    response: &'a ControlResponse,
}

#[derive(Serialize)]
struct RequestFrame<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    request_id: &'a RequestId,
    request: &'a T,
}

impl ControlResponse {
    /// Successful response
    pub fn success(request_id: RequestId, response: Option<Value>) -> Self {
        Self::Success {
            request_id,
            response,
        }
    }

    /// Error response
    pub fn error(request_id: RequestId, error: impl Into<String>) -> Self {
        Self::Error {
            request_id,
            error: error.into(),
        }
    }

    /// Id of the request being answered
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Success { request_id, .. } | Self::Error { request_id, .. } => request_id,
        }
    }

    /// Serialize as a `control_response` line (without trailing newline)
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&ResponseFrame {
            kind: "control_response",
            response: self,
        })?)
    }
}

/// Requests the client issues to the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum OutboundRequest {
    /// Handshake carrying hook registrations
    Initialize {
        /// Event name to matcher list
        #[serde(skip_serializing_if = "Option::is_none")]
        hooks: Option<BTreeMap<String, Vec<HookMatcherConfig>>>,
    },

    /// Interrupt the current turn
    Interrupt,

    /// Switch the model (`None` restores the default)
    SetModel {
        /// Model name
        model: Option<String>,
    },

    /// Change the permission mode
    SetPermissionMode {
        /// New mode
        mode: PermissionMode,
    },
}

impl OutboundRequest {
    /// Subtype name for logging
    pub fn subtype(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Interrupt => "interrupt",
            Self::SetModel { .. } => "set_model",
            Self::SetPermissionMode { .. } => "set_permission_mode",
        }
    }
}

/// Serialize any request body as a `control_request` line (without trailing newline)
pub fn request_line<T: Serialize>(request_id: &RequestId, request: &T) -> Result<String> {
    Ok(serde_json::to_string(&RequestFrame {
        kind: "control_request",
        request_id,
        request,
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_hook_callback() {
        let inbound = Inbound::classify(json!({
            "type": "control_request",
            "request_id": "cli_1",
            "request": {
                "subtype": "hook_callback",
                "callback_id": "hook_0",
                "input": {"hook_event_name": "PreToolUse", "tool_name": "Bash"},
                "tool_use_id": "toolu_1"
            }
        }))
        .unwrap();

        match inbound {
            Inbound::ControlRequest {
                request_id,
                request: ControlRequest::HookCallback(req),
            } => {
                assert_eq!(request_id.as_str(), "cli_1");
                assert_eq!(req.callback_id, "hook_0");
                assert_eq!(req.tool_use_id.as_deref(), Some("toolu_1"));
                assert_eq!(req.input.tool_name.as_deref(), Some("Bash"));
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn test_classify_mcp_message_alias() {
        for (subtype, field) in [("sdk_mcp_request", "serverName"), ("mcp_message", "server_name")] {
            let inbound = Inbound::classify(json!({
                "type": "control_request",
                "request_id": "r",
                "request": {
                    "subtype": subtype,
                    field: "calc",
                    "message": {"jsonrpc": "2.0", "id": 1, "method": "tools/list"}
                }
            }))
            .unwrap();

            match inbound {
                Inbound::ControlRequest {
                    request: ControlRequest::McpMessage(req),
                    ..
                } => {
                    assert_eq!(req.server_name, "calc");
                    assert_eq!(req.message.method, "tools/list");
                }
                other => panic!("unexpected classification: {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_and_malformed_subtypes() {
        assert_eq!(
            ControlRequest::from_value(json!({"subtype": "rewind_files"})),
            ControlRequest::Unknown {
                subtype: "rewind_files".to_string()
            }
        );

        let malformed = ControlRequest::from_value(json!({"subtype": "hook_callback"}));
        assert!(matches!(malformed, ControlRequest::Malformed { .. }));
        assert_eq!(malformed.subtype(), "hook_callback");
    }

    #[test]
    fn test_control_request_without_id_is_an_error() {
        let result = Inbound::classify(json!({"type": "control_request", "request": {}}));
        assert!(matches!(result, Err(ProtocolError::MissingField("request_id"))));
    }

    #[test]
    fn test_classify_responses() {
        let success = Inbound::parse_line(
            r#"{"type":"control_response","response":{"subtype":"success","request_id":"req_1_abcd1234","response":{"ok":true}}}"#,
        )
        .unwrap();
        assert_eq!(
            success,
            Inbound::ControlResponse(ControlResponse::success(
                RequestId::from("req_1_abcd1234"),
                Some(json!({"ok": true}))
            ))
        );

        let error = Inbound::parse_line(
            r#"{"type":"control_response","response":{"subtype":"error","request_id":"r","error":"bad"}}"#,
        )
        .unwrap();
        assert_eq!(
            error,
            Inbound::ControlResponse(ControlResponse::error(RequestId::from("r"), "bad"))
        );
    }

    #[test]
    fn test_non_object_line_is_invalid() {
        assert!(matches!(
            Inbound::parse_line("[1,2]"),
            Err(ProtocolError::InvalidMessage(_))
        ));
        assert!(matches!(
            Inbound::parse_line("not json"),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[test]
    fn test_response_line_shape() {
        let line = ControlResponse::success(RequestId::from("cli_9"), Some(json!({"a": 1})))
            .to_line()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "control_response",
                "response": {"subtype": "success", "request_id": "cli_9", "response": {"a": 1}}
            })
        );
    }

    #[test]
    fn test_outbound_request_lines() {
        let id = RequestId::from("req_0_00000000");

        let line = request_line(&id, &OutboundRequest::Interrupt).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "control_request",
                "request_id": "req_0_00000000",
                "request": {"subtype": "interrupt"}
            })
        );

        let mode = OutboundRequest::SetPermissionMode {
            mode: PermissionMode::AcceptEdits,
        };
        let value: Value = serde_json::from_str(&request_line(&id, &mode).unwrap()).unwrap();
        assert_eq!(value["request"], json!({"subtype": "set_permission_mode", "mode": "acceptEdits"}));
    }

    #[test]
    fn test_initialize_carries_hooks() {
        let mut hooks = BTreeMap::new();
        hooks.insert(
            "PreToolUse".to_string(),
            vec![HookMatcherConfig::new(Some("Bash"), vec!["hook_0".to_string()], Some(2000))],
        );
        let request = OutboundRequest::Initialize { hooks: Some(hooks) };
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["subtype"], "initialize");
        assert_eq!(value["hooks"]["PreToolUse"][0]["hookCallbackIds"][0], "hook_0");
        assert_eq!(value["hooks"]["PreToolUse"][0]["timeout"], json!(2.0));
    }
}
