//! Observer wire protocol.
//!
//! Bridge → observer messages are [`ServerMessage`]; observer → bridge text
//! frames are decoded by [`ObserverCommand::parse`]. Both sides use a JSON
//! object tagged by `type`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Creating,
    Ready,
    Busy,
    Closed,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Ready => "Ready",
            Self::Busy => "Busy",
            Self::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent from the bridge to an observer.
///
/// Agent events are carried as the raw JSON the agent emitted, so the bridge
/// never re-encodes (or loses) fields it does not understand.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ClaudeEvent { event: Arc<RawValue> },
    SessionStatus { status: SessionStatus },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Render as a single JSON text frame.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Message sent from an observer to the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverCommand {
    UserMessage {
        content: String,
    },
    Interrupt,
    PermissionResponse {
        request_id: String,
        allow: bool,
        updated_input: Option<Value>,
    },
}

#[derive(Deserialize)]
struct UserMessagePayload {
    content: String,
}

#[derive(Deserialize)]
struct PermissionResponsePayload {
    request_id: String,
    allow: bool,
    #[serde(default)]
    updated_input: Option<Value>,
}

/// Why an observer frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("missing message type")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

impl ObserverCommand {
    /// Decode one observer text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Some(obj) = value.as_object() else {
            return Err(ProtocolError::Malformed("expected a JSON object".into()));
        };
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        match kind.as_str() {
            "user_message" => {
                let p: UserMessagePayload = payload("user_message", value)?;
                Ok(Self::UserMessage { content: p.content })
            }
            "interrupt" => Ok(Self::Interrupt),
            "permission_response" => {
                let p: PermissionResponsePayload = payload("permission_response", value)?;
                Ok(Self::PermissionResponse {
                    request_id: p.request_id,
                    allow: p.allow,
                    updated_input: p.updated_input.filter(|v| !v.is_null()),
                })
            }
            _ => Err(ProtocolError::UnknownType(kind)),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    value: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}
