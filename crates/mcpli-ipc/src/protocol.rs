//! The IPC wire protocol.
//!
//! Requests and responses are single JSON objects; the transport frame is
//! the compact JSON encoding followed by one `\n`. Unknown methods and
//! unknown fields are rejected at decode time so malformed input fails
//! before any handler runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Methods a client may invoke on a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IpcMethod {
    /// Liveness probe; answered with `"pong"`.
    Ping,
    /// Enumerate tools exposed by the MCP session.
    ListTools,
    /// Invoke a tool.
    CallTool,
    /// Cancel an in-flight `callTool` on another connection.
    CancelCall,
}

impl IpcMethod {
    /// Wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::ListTools => "listTools",
            Self::CallTool => "callTool",
            Self::CancelCall => "cancelCall",
        }
    }
}

/// A single request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpcRequest {
    /// Caller-chosen request id, echoed back in the response.
    pub id: String,
    /// Invoked method.
    pub method: IpcMethod,
    /// Method parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl IpcRequest {
    /// Build a request with a fresh v4 UUID id.
    #[must_use]
    pub fn new(method: IpcMethod, params: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params,
        }
    }

    /// Decode and validate `callTool` parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if params are missing or do not match the expected
    /// shape.
    pub fn call_tool_params(&self) -> Result<CallToolParams, serde_json::Error> {
        serde_json::from_value(self.params.clone().unwrap_or(Value::Null))
    }

    /// Decode and validate `cancelCall` parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if params are missing or do not match the expected
    /// shape.
    pub fn cancel_call_params(&self) -> Result<CancelCallParams, serde_json::Error> {
        serde_json::from_value(self.params.clone().unwrap_or(Value::Null))
    }
}

/// Parameters for `callTool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CallToolParams {
    /// Tool name as advertised by `listTools`.
    pub name: String,
    /// Tool arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Parameters for `cancelCall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CancelCallParams {
    /// The `id` of the in-flight `callTool` request to cancel.
    pub ipc_request_id: String,
    /// Optional human-readable reason, logged by the daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A single response frame: exactly one of `result` or `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpcResponse {
    /// Echo of the request id.
    pub id: String,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    /// Successful response.
    #[must_use]
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn err(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(message.into()),
        }
    }

    /// Whether this response carries an error.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips() {
        let request = IpcRequest {
            id: "r1".to_string(),
            method: IpcMethod::CallTool,
            params: Some(json!({"name": "echo", "arguments": {"text": "hi"}})),
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: IpcRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn methods_use_camel_case_wire_names() {
        let encoded = serde_json::to_string(&IpcMethod::ListTools).unwrap();
        assert_eq!(encoded, "\"listTools\"");
        let encoded = serde_json::to_string(&IpcMethod::CancelCall).unwrap();
        assert_eq!(encoded, "\"cancelCall\"");
    }

    #[test]
    fn unknown_method_is_rejected() {
        let raw = r#"{"id":"r1","method":"evalArbitraryCode"}"#;
        assert!(serde_json::from_str::<IpcRequest>(raw).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"{"id":"r1","method":"ping","extra":true}"#;
        assert!(serde_json::from_str::<IpcRequest>(raw).is_err());
    }

    #[test]
    fn ping_without_params_parses() {
        let raw = r#"{"id":"r1","method":"ping"}"#;
        let request: IpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.method, IpcMethod::Ping);
        assert!(request.params.is_none());
    }

    #[test]
    fn cancel_call_params_decode() {
        let raw = r#"{"id":"r3","method":"cancelCall","params":{"ipcRequestId":"r2","reason":"aborted"}}"#;
        let request: IpcRequest = serde_json::from_str(raw).unwrap();
        let params = request.cancel_call_params().unwrap();
        assert_eq!(params.ipc_request_id, "r2");
        assert_eq!(params.reason.as_deref(), Some("aborted"));
    }

    #[test]
    fn response_round_trips_and_is_exclusive() {
        let ok = IpcResponse::ok("r1", json!("pong"));
        let encoded = serde_json::to_string(&ok).unwrap();
        assert_eq!(encoded, r#"{"id":"r1","result":"pong"}"#);
        assert!(!ok.is_err());

        let err = IpcResponse::err("r1", "boom");
        let encoded = serde_json::to_string(&err).unwrap();
        assert_eq!(encoded, r#"{"id":"r1","error":"boom"}"#);
        assert!(err.is_err());
    }
}
