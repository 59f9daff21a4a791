//! Mutable per-session state, guarded by the session lock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::value::RawValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use agentbridge_core::ndjson::EventMeta;
use agentbridge_core::protocol::{ServerMessage, SessionStatus};

use super::observers::ObserverRegistry;
use super::pump::PumpCompletion;
use crate::subprocess::{AgentStdin, ProcessHandle};

/// Agent stdin shared between writers. Cloned out of the session lock so a
/// slow write never blocks readers of session state.
pub(crate) type SharedStdin = Arc<Mutex<AgentStdin>>;

/// Whether `from -> to` is an edge of the session lifecycle.
pub(crate) const fn is_valid_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::{Busy, Closed, Creating, Ready};
    matches!(
        (from, to),
        (Creating, Ready | Busy | Closed)
            | (Ready, Ready | Busy | Closed)
            | (Busy, Busy | Ready | Closed)
    )
}

pub(crate) struct SessionState {
    pub status: SessionStatus,
    pub external_session_id: Option<String>,
    pub cost_usd: f64,
    pub turn_count: u64,
    pub last_active_at: SystemTime,
    pub process: Option<ProcessHandle>,
    pub stdin: Option<SharedStdin>,
    pub pump: Option<PumpCompletion>,
    pub history: Vec<Arc<RawValue>>,
    pub observers: ObserverRegistry,
}

impl SessionState {
    pub fn new(now: SystemTime) -> Self {
        Self {
            status: SessionStatus::Creating,
            external_session_id: None,
            cost_usd: 0.0,
            turn_count: 0,
            last_active_at: now,
            process: None,
            stdin: None,
            pump: None,
            history: Vec::new(),
            observers: ObserverRegistry::default(),
        }
    }

    /// Move to `next`, notifying observers only when the status changes.
    /// Returns `false` for an edge that is not part of the lifecycle, leaving
    /// the status untouched.
    pub fn set_status(&mut self, session_id: &str, next: SessionStatus) -> bool {
        let from = self.status;
        if !is_valid_transition(from, next) {
            warn!(session_id, %from, to = %next, "Ignoring invalid status transition");
            return false;
        }
        if from != next {
            self.status = next;
            debug!(session_id, %from, to = %next, "Session status changed");
            self.announce_status(session_id);
        }
        true
    }

    /// Send the current status to every observer.
    pub fn announce_status(&mut self, session_id: &str) {
        let status = self.status;
        self.broadcast(session_id, &ServerMessage::SessionStatus { status });
    }

    /// Append an event to the replay buffer and deliver it live.
    pub fn record_event(&mut self, session_id: &str, event: Arc<RawValue>) {
        self.history.push(Arc::clone(&event));
        self.touch();
        self.broadcast(session_id, &ServerMessage::ClaudeEvent { event });
    }

    /// Fold the metadata of one agent event into the session.
    pub fn apply_meta(&mut self, session_id: &str, meta: &EventMeta) {
        if let Some(ref ext) = meta.session_id
            && self.external_session_id.as_deref() != Some(ext.as_str())
        {
            debug!(session_id, external_session_id = %ext, "Captured agent session id");
            self.external_session_id = Some(ext.clone());
        }
        if let Some(cost) = meta.cost_usd {
            self.cost_usd += cost;
        }
        if meta.is_turn_result() && self.status == SessionStatus::Busy {
            self.set_status(session_id, SessionStatus::Ready);
        }
    }

    pub fn broadcast(&mut self, session_id: &str, message: &ServerMessage) {
        for observer in self.observers.broadcast(message) {
            debug!(session_id, %observer, "Dropped disconnected observer");
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = SystemTime::now();
    }
}

/// Milliseconds since the Unix epoch, saturating at zero.
pub(crate) fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
