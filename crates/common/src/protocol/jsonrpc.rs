// JSON-RPC 2.0 request/response types for the daemon socket protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const CURRENT_PROTOCOL_VERSION: u32 = 1;
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[CURRENT_PROTOCOL_VERSION];

#[must_use]
pub fn is_supported_protocol_version(version: u32) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// A JSON-RPC 2.0 request. A request without an `id` is a notification and
/// never receives a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

/// A JSON-RPC 2.0 response. `id` is always serialized; it is `null` only when
/// the request could not be parsed far enough to recover its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<RequestId>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID: integer or string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

// Reserved server-error band.
pub const SERVER_ERROR_MIN: i32 = -32099;
pub const SERVER_ERROR_MAX: i32 = -32000;

// ── Application codes (server-error band) ──────────────────────────
pub const SESSION_NOT_OPEN: i32 = -32001;
pub const SESSION_MISMATCH: i32 = -32002;
pub const SNAPSHOT_NOT_FOUND: i32 = -32003;
pub const DISK_IO: i32 = -32004;
pub const AGENT_DISABLED: i32 = -32010;
pub const AGENT_COMMAND_NOT_FOUND: i32 = -32011;
pub const AGENT_TIMEOUT: i32 = -32012;
pub const AGENT_NON_ZERO_EXIT: i32 = -32013;
pub const AGENT_OUTPUT_TOO_LARGE: i32 = -32014;
pub const AGENT_SPAWN_FAILED: i32 = -32015;
pub const SESSION_SUPERSEDED: i32 = -32016;

#[must_use]
pub fn is_server_error_code(code: i32) -> bool {
    (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code)
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), method: method.into(), params, id: None }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl Response {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), result: Some(result), error: None, id }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self { jsonrpc: JSONRPC_VERSION.to_string(), result: None, error: Some(error), id }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
