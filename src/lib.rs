pub mod catalog;
pub mod config;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use mcp_types::*;

use axum::{http::StatusCode, response::{IntoResponse, Response as AxumResponse}};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

// JSON-RPC 2.0 and MCP error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const RESOURCE_NOT_FOUND: i32 = -32002;

// protocol version
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JsonRpcBase {
    pub jsonrpc: String,
}

impl Default for JsonRpcBase {
    fn default() -> Self {
        JsonRpcBase { jsonrpc: JSONRPC_VERSION.to_string() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    #[serde(flatten)]
    pub protocol: JsonRpcBase,
    pub method: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    #[serde(flatten)]
    pub protocol: JsonRpcBase,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub base: JsonRpcBase,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Hash, Eq)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(serde_json::Number),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Json serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid JSON-RPC 2.0 message: {0}")]
    InvalidMessage(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
    #[error("Unknown resource: {0}")]
    ResourceNotFound(String),
    #[error("missing session identifier")]
    MissingSessionId,
    #[error("unknown session")]
    SessionNotFound,
    #[error("session {0} is already registered")]
    DuplicateSession(uuid::Uuid),
    #[error("session {0} closed before the message was handled")]
    SessionClosed(uuid::Uuid),
    #[error("widget asset '{name}' not found in {dir}")]
    AssetNotFound { name: String, dir: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("Request timed out")]
    RequestTimeout,
}

impl McpError {
    /// JSON-RPC error code used when this error is reported inside a response envelope.
    pub fn rpc_code(&self) -> i32 {
        match self {
            McpError::Serialization(_) => PARSE_ERROR,
            McpError::InvalidMessage(_) | McpError::ProtocolError(_) => INVALID_REQUEST,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::ResourceNotFound(_) => RESOURCE_NOT_FOUND,
            _ => INTERNAL_ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            McpError::MissingSessionId
            | McpError::InvalidMessage(_)
            | McpError::Serialization(_) => StatusCode::BAD_REQUEST,
            // A session that closed mid-flight is indistinguishable from one that never existed.
            McpError::SessionNotFound | McpError::SessionClosed(_) => StatusCode::NOT_FOUND,
            McpError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for McpError {
    fn into_response(self) -> AxumResponse {
        let status = self.status_code();
        let body = match &self {
            McpError::SessionClosed(_) => McpError::SessionNotFound.to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

//--------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ServerResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ServerToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResourcesCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerToolsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

// --- Initialize Request/Response Payloads ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpMessage {
    /// A JSON-RPC Request. Must have a `method`, an `id`, and optionally `params`.
    Request(Request),
    /// A JSON-RPC Response. Must have an `id` and either `result` or `error`.
    Response(Response),
    /// A JSON-RPC Notification. Must have a `method` but NO `id`.
    Notification(Notification),
}

impl Request {
    pub fn new<I: Into<RequestId>, P: Into<Option<Value>>>(id: I, method: &str, params: P) -> Self {
        Request {
            protocol: JsonRpcBase::default(),
            method: method.to_string(),
            id: id.into(),
            params: params.into(),
        }
    }
}

impl Response {
    pub fn new_success<I: Into<RequestId>, R: Into<Option<Value>>>(id: I, result: R) -> Self {
        Response {
            protocol: JsonRpcBase::default(),
            id: id.into(),
            result: result.into(),
            error: None,
        }
    }

    pub fn new_error<I: Into<RequestId>>(id: I, code: i32, message: &str, data: Option<Value>) -> Self {
        Response {
            protocol: JsonRpcBase::default(),
            id: id.into(),
            result: None,
            error: Some(ResponseError {
                code,
                message: message.to_string(),
                data,
            }),
        }
    }

    /// Serializes `result` into a success response.
    pub fn from_result<T: Serialize>(id: RequestId, result: &T) -> Result<Self, McpError> {
        Ok(Response::new_success(id, serde_json::to_value(result)?))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl Notification {
    pub fn new<P: Into<Option<Value>>>(method: &str, params: P) -> Self {
        Notification {
            base: JsonRpcBase::default(),
            method: method.to_string(),
            params: params.into(),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl McpMessage {
    pub fn from_json(json: &str) -> Result<Self, McpError> {
        let raw: Value = serde_json::from_str(json)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self, McpError> {
        let Value::Object(fields) = &raw else {
            return Err(McpError::InvalidMessage("message must be a JSON object".to_string()));
        };

        if fields.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(McpError::InvalidMessage("'jsonrpc' must be '2.0'".to_string()));
        }

        let has_id = fields.get("id").is_some_and(|id| !id.is_null());

        if fields.contains_key("method") {
            if has_id {
                return Ok(McpMessage::Request(serde_json::from_value(raw)?));
            }
            return Ok(McpMessage::Notification(serde_json::from_value(raw)?));
        }

        if !has_id {
            return Err(McpError::InvalidMessage(
                "Response: 'id' field is required and must not be null".to_string(),
            ));
        }
        // Either result OR error MUST be set, not both.
        match (fields.contains_key("result"), fields.contains_key("error")) {
            (true, true) => Err(McpError::InvalidMessage(
                "Response: 'result' and 'error' cannot both be set".to_string(),
            )),
            (false, false) => Err(McpError::InvalidMessage(
                "Response: Either 'result' or 'error' must be set".to_string(),
            )),
            _ => Ok(McpMessage::Response(serde_json::from_value(raw)?)),
        }
    }

    pub fn to_json(&self) -> Result<String, McpError> {
        serde_json::to_string(self).map_err(McpError::Serialization)
    }
}
