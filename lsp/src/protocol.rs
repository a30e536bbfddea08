//! JSON-RPC message shapes and the method vocabulary shared by both ends.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "initialized";
pub const METHOD_SHUTDOWN: &str = "shutdown";
pub const METHOD_EXIT: &str = "exit";

/// Notification: replace one resource's diagnostics.
pub const METHOD_REPLACE: &str = "diagnostics/replace";
/// Request: append one diagnostic, answered with `{ok: true}`.
pub const METHOD_APPEND: &str = "diagnostics/append";
/// Notification: clear one resource, or everything.
pub const METHOD_CLEAR: &str = "diagnostics/clearResource";
/// Notification from the reconciler after every change.
pub const METHOD_PUBLISH: &str = "textDocument/publishDiagnostics";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// A decoded frame, classified by the JSON-RPC fields it carries.
#[derive(Debug)]
pub(crate) enum IncomingFrame {
    Response {
        id: u64,
        body: Value,
    },
    Request {
        id: Value,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

pub(crate) fn parse_incoming(frame: &Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();
    let params = || frame.get("params").cloned();

    match (id, method, has_result_or_error) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::Request {
            id: id.clone(),
            method,
            params: params(),
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: params(),
        }),
        _ => None,
    }
}

pub(crate) fn initialize_params(root_uri: &str) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "clientInfo": {
            "name": "lintbridge",
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {}
    })
}

pub(crate) fn initialize_result() -> Value {
    serde_json::json!({
        "capabilities": {},
        "serverInfo": {
            "name": "lintbridge-reconciler",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDescription {
    pub href: String,
}

/// An editor-renderable diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspDiagnostic {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_description: Option<CodeDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_absent_params() {
        let json = serde_json::to_value(Request::new(1, METHOD_SHUTDOWN, None)).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": 1, "method": "shutdown"}));
    }

    #[test]
    fn notification_has_no_id() {
        let notif = Notification::new(METHOD_REPLACE, Some(json!({"resourceId": "x"})));
        let json = serde_json::to_value(&notif).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["params"]["resourceId"], "x");
    }

    #[test]
    fn null_result_is_still_serialized() {
        let json = serde_json::to_value(Response::success(json!(4), Value::Null)).unwrap();
        assert!(json.as_object().unwrap().contains_key("result"));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_response_carries_code() {
        let json =
            serde_json::to_value(Response::error(json!("a"), METHOD_NOT_FOUND, "nope")).unwrap();
        assert_eq!(json["id"], "a");
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn incoming_frames_are_classified() {
        let response = parse_incoming(&json!({"jsonrpc": "2.0", "id": 9, "result": {"ok": true}}));
        assert!(matches!(response, Some(IncomingFrame::Response { id: 9, .. })));

        let request = parse_incoming(&json!({
            "jsonrpc": "2.0", "id": "r1", "method": "diagnostics/append", "params": {"a": 1}
        }));
        match request {
            Some(IncomingFrame::Request { id, method, params }) => {
                assert_eq!(id, json!("r1"));
                assert_eq!(method, METHOD_APPEND);
                assert_eq!(params, Some(json!({"a": 1})));
            }
            other => panic!("expected request, got {other:?}"),
        }

        let notif = parse_incoming(&json!({"jsonrpc": "2.0", "method": "exit"}));
        assert!(matches!(
            notif,
            Some(IncomingFrame::Notification { ref method, params: None }) if method == "exit"
        ));

        assert!(parse_incoming(&json!({"jsonrpc": "2.0"})).is_none());
        assert!(parse_incoming(&json!({"jsonrpc": "2.0", "id": "s", "result": 1})).is_none());
    }

    #[test]
    fn publish_params_roundtrip_lsp_shape() {
        let value = json!({
            "uri": "file:///w/a.py",
            "diagnostics": [{
                "range": {
                    "start": {"line": 0, "character": 4},
                    "end": {"line": 0, "character": 5}
                },
                "severity": 2,
                "code": "unused-import",
                "codeDescription": {"href": "https://example.invalid"},
                "source": "pylint",
                "message": "Unused import os"
            }]
        });
        let params: PublishDiagnosticsParams = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(params.diagnostics[0].range.start.character, 4);
        assert_eq!(serde_json::to_value(&params).unwrap(), value);
    }

    #[test]
    fn diagnostic_optional_fields_default() {
        let diag: LspDiagnostic = serde_json::from_value(json!({
            "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 1}},
            "message": "bare"
        }))
        .unwrap();
        assert_eq!(diag.severity, None);
        assert_eq!(diag.source, None);
    }
}
