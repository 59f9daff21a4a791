//! Session types.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use agentbridge_core::protocol::{ProtocolError, ServerMessage, SessionStatus};

use crate::subprocess::LaunchError;

/// Identifies one observer registration within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// What a session pushes onto an observer's outbound queue.
#[derive(Debug, Clone)]
pub enum ObserverFrame {
    /// Deliver a message.
    Message(ServerMessage),
    /// The session is gone; the transport should close the connection.
    Disconnect,
}

/// Tunables shared by every session of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Longest agent stdout line accepted by the read pump.
    pub max_line_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: agentbridge_core::config::DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub project: String,
    pub project_path: PathBuf,
    pub model: Option<String>,
    pub external_session_id: Option<String>,
    pub status: SessionStatus,
    pub cost_usd: f64,
    pub turn_count: u64,
    pub event_count: usize,
    pub observer_count: usize,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub last_active_at: u64,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session is closed: {id}")]
    Closed { id: String },

    #[error("No active agent process for session: {id}")]
    NoActiveProcess { id: String },

    #[error("Session has not been started: {id}")]
    NotStarted { id: String },

    #[error("Session already started: {id}")]
    AlreadyStarted { id: String },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("Failed to write to agent stdin for session {id}: {source}")]
    Write {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl SessionError {
    /// Stable machine-readable reason.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Closed { .. } => "already_closed",
            Self::NoActiveProcess { .. } => "no_active_process",
            Self::NotStarted { .. } => "not_started",
            Self::AlreadyStarted { .. } => "already_started",
            Self::Launch(_) => "launch_failed",
            Self::Write { .. } => "write_failed",
            Self::Decode(_) => "decode_error",
        }
    }
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let id = "s1".to_string();
        assert_eq!(SessionError::NotFound { id: id.clone() }.kind(), "not_found");
        assert_eq!(SessionError::Closed { id: id.clone() }.kind(), "already_closed");
        assert_eq!(
            SessionError::NoActiveProcess { id }.kind(),
            "no_active_process"
        );
        assert_eq!(
            SessionError::from(ProtocolError::MissingType).kind(),
            "decode_error"
        );
    }

    #[test]
    fn observer_ids_display_with_prefix() {
        assert_eq!(ObserverId(7).to_string(), "observer-7");
    }
}
