//! Wire messages exchanged with the Figma relay.
//!
//! Outbound traffic is strictly typed ([`CommandEnvelope`]). Inbound traffic
//! is not: the plugin and relay answer in several shapes, so
//! [`InboundMessage`] keeps every field optional and leaves interpretation to
//! the correlator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// Name of the command that joins a channel.
pub const JOIN_COMMAND: &str = "join";

/// `type` value of progress messages.
pub const PROGRESS_UPDATE: &str = "progress_update";

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Channel join request.
    Join,
    /// Regular command.
    Message,
}

/// The command carried inside an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandMessage {
    /// Same id as the envelope.
    pub id: String,
    /// Command name, e.g. `get_document_info`.
    pub command: String,
    /// Command parameters.
    pub params: Value,
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandEnvelope {
    /// Correlation id, equal to the pending request id.
    pub id: String,
    /// Join or regular message.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Channel the command is addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// The wrapped command.
    pub message: CommandMessage,
}

impl CommandEnvelope {
    /// Builds a join envelope for `channel`.
    #[must_use]
    pub fn join(id: impl Into<String>, channel: &str) -> Self {
        let id = id.into();
        Self {
            id: id.clone(),
            kind: EnvelopeKind::Join,
            channel: Some(channel.to_string()),
            message: CommandMessage {
                id,
                command: JOIN_COMMAND.to_string(),
                params: serde_json::json!({ "channel": channel }),
            },
        }
    }

    /// Builds a command envelope, injecting `commandId` into the params.
    ///
    /// `null` params are treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidParams`] if `params` is neither an
    /// object nor `null`.
    pub fn command(
        id: impl Into<String>,
        channel: &str,
        command: &str,
        params: Value,
    ) -> Result<Self, BridgeError> {
        let id = id.into();
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(BridgeError::InvalidParams {
                    command: command.to_string(),
                    message: format!("expected an object, got {}", json_type_name(&other)),
                })
            }
        };
        params.insert("commandId".to_string(), Value::String(id.clone()));

        Ok(Self {
            id: id.clone(),
            kind: EnvelopeKind::Message,
            channel: Some(channel.to_string()),
            message: CommandMessage {
                id,
                command: command.to_string(),
                params: Value::Object(params),
            },
        })
    }

    /// Serialises the envelope to a single-line JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transmission`] if serialisation fails.
    pub fn to_text(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Transmission {
            message: e.to_string(),
        })
    }
}

/// Returns a human-readable JSON type name.
#[must_use]
pub const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Payload of a progress update (`message.data`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    /// Command the progress belongs to.
    #[serde(default)]
    pub command_type: Option<String>,
    /// Percentage complete.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Human-readable status line.
    #[serde(default)]
    pub message: Option<String>,
    /// Plugin-side status (`started`, `in_progress`, `completed`, `error`).
    #[serde(default)]
    pub status: Option<String>,
    /// Id of the command, when the plugin includes it.
    #[serde(default)]
    pub command_id: Option<String>,
    /// Items processed so far.
    #[serde(default)]
    pub processed_items: Option<u64>,
    /// Total items to process.
    #[serde(default)]
    pub total_items: Option<u64>,
}

impl ProgressData {
    /// Item counts as `processed/total`, when the plugin reports them.
    #[must_use]
    pub fn item_counts(&self) -> Option<String> {
        match (self.processed_items, self.total_items) {
            (Some(done), Some(total)) => Some(format!("{done}/{total}")),
            (Some(done), None) => Some(done.to_string()),
            (None, _) => None,
        }
    }
}

/// A loosely structured inbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// Outer `id`, stringified if the peer sent a number.
    pub id: Option<String>,
    /// Outer `type`.
    pub kind: Option<String>,
    /// Outer `channel`.
    pub channel: Option<String>,
    /// Outer `command`.
    pub command: Option<String>,
    /// Outer `result`.
    pub result: Option<Value>,
    /// Outer `error`.
    pub error: Option<Value>,
    /// Nested `message`, any JSON shape.
    pub message: Option<Value>,
}

impl InboundMessage {
    /// Parses a text frame.
    ///
    /// Returns `None` when the text is not a JSON object.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        Self::from_value(value)
    }

    /// Extracts the known fields from a JSON object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut obj) = value else {
            return None;
        };

        Some(Self {
            id: obj.get("id").and_then(id_string),
            kind: obj.get("type").and_then(Value::as_str).map(str::to_string),
            channel: obj
                .get("channel")
                .and_then(Value::as_str)
                .map(str::to_string),
            command: obj
                .get("command")
                .and_then(Value::as_str)
                .map(str::to_string),
            result: obj.remove("result").filter(|v| !v.is_null()),
            error: obj.remove("error").filter(|v| !v.is_null()),
            message: obj.remove("message").filter(|v| !v.is_null()),
        })
    }

    /// Returns `true` for progress updates.
    #[must_use]
    pub fn is_progress(&self) -> bool {
        self.kind.as_deref() == Some(PROGRESS_UPDATE)
    }

    fn nested(&self, key: &str) -> Option<&Value> {
        self.message
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
    }

    /// Nested `message.id`.
    #[must_use]
    pub fn nested_id(&self) -> Option<String> {
        self.nested("id").and_then(id_string)
    }

    /// Nested `message.result`.
    #[must_use]
    pub fn nested_result(&self) -> Option<&Value> {
        self.nested("result")
    }

    /// Nested `message.error`.
    #[must_use]
    pub fn nested_error(&self) -> Option<&Value> {
        self.nested("error")
    }

    /// Nested `message.command`.
    #[must_use]
    pub fn nested_command(&self) -> Option<&str> {
        self.nested("command").and_then(Value::as_str)
    }

    /// The nested message when it is a JSON object.
    #[must_use]
    pub fn message_object(&self) -> Option<&Value> {
        self.message.as_ref().filter(|m| m.is_object())
    }

    /// Command name, outer first.
    #[must_use]
    pub fn command_name(&self) -> Option<&str> {
        self.command.as_deref().or_else(|| self.nested_command())
    }

    /// Looks like one of our own command envelopes reflected by the relay.
    #[must_use]
    pub fn is_command_echo(&self) -> bool {
        self.result.is_none()
            && self.error.is_none()
            && self.nested_command().is_some()
            && self.nested("params").is_some()
            && self.nested_result().is_none()
            && self.nested_error().is_none()
    }

    /// Decodes `message.data` of a progress update.
    #[must_use]
    pub fn progress_data(&self) -> Option<ProgressData> {
        self.nested("data")
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }
}

/// Accepts string and numeric ids.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Renders a remote error payload as a message.
#[must_use]
pub fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    }
}
