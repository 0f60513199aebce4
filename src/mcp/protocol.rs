//! JSON-RPC 2.0 message types for the MCP stdio channel.
//!
//! Incoming lines are either requests (carry an `id`, expect exactly one
//! reply) or notifications (no `id`, no reply). Every outgoing reply is a
//! [`Response`] carrying either a `result` or an `error`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol version this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported during initialisation.
pub const SERVER_NAME: &str = "figma-mcp-bridge";

const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request ID. Strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A request from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Request identifier, echoed in the response.
    pub id: RequestId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    /// Deserialises `params` into `T`.
    ///
    /// # Errors
    ///
    /// Returns an invalid-params [`Response`] if `params` is missing or has
    /// the wrong shape.
    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, Response> {
        let params = self.params.clone().ok_or_else(|| {
            Response::error(
                Some(self.id.clone()),
                ErrorCode::InvalidParams,
                format!("Missing params for {}", self.method),
            )
        })?;
        serde_json::from_value(params).map_err(|e| {
            Response::error(
                Some(self.id.clone()),
                ErrorCode::InvalidParams,
                format!("Invalid params for {}: {e}", self.method),
            )
        })
    }
}

/// A notification from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Notification name, e.g. `notifications/initialized`.
    pub method: String,
    /// Notification parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A parsed client message.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Expects a response.
    Request(Request),
    /// Fire and forget.
    Notification(Notification),
}

impl Incoming {
    /// The method name.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    /// Parses one line of client input.
    ///
    /// # Errors
    ///
    /// Returns the error [`Response`] to write back when the line is not
    /// JSON (`-32700`) or not a JSON-RPC 2.0 message (`-32600`).
    pub fn parse(line: &str) -> Result<Self, Response> {
        let value: Value = serde_json::from_str(line)
            .map_err(|_| Response::error(None, ErrorCode::ParseError, "Parse error"))?;

        let Some(obj) = value.as_object() else {
            return Err(Response::error(None, ErrorCode::InvalidRequest, "Expected a JSON object"));
        };

        let id = obj
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(Response::error(
                id,
                ErrorCode::InvalidRequest,
                "jsonrpc field must be \"2.0\"",
            ));
        }

        if obj.contains_key("id") {
            let request: Request = serde_json::from_value(value)
                .map_err(|e| Response::error(id.clone(), ErrorCode::InvalidRequest, e.to_string()))?;
            if request.method.is_empty() {
                return Err(Response::error(
                    Some(request.id),
                    ErrorCode::InvalidRequest,
                    "method field cannot be empty",
                ));
            }
            Ok(Self::Request(request))
        } else {
            let notification: Notification = serde_json::from_value(value)
                .map_err(|e| Response::error(None, ErrorCode::InvalidRequest, e.to_string()))?;
            Ok(Self::Notification(notification))
        }
    }
}

/// Standard JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON.
    ParseError,
    /// Not a valid request object, or not allowed in the current state.
    InvalidRequest,
    /// Unknown method.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal error.
    InternalError,
}

impl ErrorCode {
    /// Numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}

/// The `error` member of an error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorObject {
    /// Numeric code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

/// Either half of a response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Success payload.
    Result(Value),
    /// Failure details.
    Error(ErrorObject),
}

/// A JSON-RPC response, success or error.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    jsonrpc: &'static str,
    /// The request this answers; absent when it could not be determined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// A success response.
    #[must_use]
    pub const fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    /// An error response.
    #[must_use]
    pub fn error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome: Outcome::Error(ErrorObject {
                code: code.code(),
                message: message.into(),
            }),
        }
    }

    /// An unknown-method error.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::error(
            Some(id),
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// The error code, if this is an error response.
    #[must_use]
    pub const fn error_code(&self) -> Option<i32> {
        match &self.outcome {
            Outcome::Error(e) => Some(e.code),
            Outcome::Result(_) => None,
        }
    }
}
