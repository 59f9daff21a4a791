//! One bridged conversation with an agent process.
//!
//! Locking: `state` is held only for in-memory bookkeeping and observer
//! enqueues, never across process or pipe I/O. `lifecycle` serializes
//! start/respawn decisions so concurrent sends spawn at most one process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;
use serde_json::value::RawValue;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use agentbridge_core::ndjson::{self, EventMeta};
use agentbridge_core::protocol::{ServerMessage, SessionStatus};

use super::observers::ObserverSender;
use super::pump::{self, PumpCompletion};
use super::state::{SessionState, SharedStdin, unix_millis};
use super::types::{ObserverFrame, ObserverId, SessionError, SessionInfo, SessionOptions};
use crate::subprocess::{AgentProcess, LaunchRequest, Launcher, ProcessHandle};

pub struct Session {
    id: String,
    project: String,
    project_path: PathBuf,
    model: Option<String>,
    created_at: SystemTime,
    options: SessionOptions,
    launcher: Arc<dyn Launcher>,
    state: Mutex<SessionState>,
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("project_path", &self.project_path)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        project: String,
        project_path: PathBuf,
        model: Option<String>,
        launcher: Arc<dyn Launcher>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let created_at = SystemTime::now();
        Arc::new(Self {
            id,
            project,
            project_path,
            model,
            created_at,
            options,
            launcher,
            state: Mutex::new(SessionState::new(created_at)),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub const fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) const fn max_line_bytes(&self) -> usize {
        self.options.max_line_bytes
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    pub async fn external_session_id(&self) -> Option<String> {
        self.state.lock().await.external_session_id.clone()
    }

    pub async fn cost_accumulated(&self) -> f64 {
        self.state.lock().await.cost_usd
    }

    pub async fn turn_count(&self) -> u64 {
        self.state.lock().await.turn_count
    }

    pub async fn event_count(&self) -> usize {
        self.state.lock().await.history.len()
    }

    pub async fn observer_count(&self) -> usize {
        self.state.lock().await.observers.len()
    }

    /// Whether an agent process is currently attached.
    pub async fn has_process(&self) -> bool {
        let state = self.state.lock().await;
        state.process.is_some() && state.stdin.is_some()
    }

    /// Completion of the most recently spawned read pump.
    pub async fn pump_completion(&self) -> Option<PumpCompletion> {
        self.state.lock().await.pump.clone()
    }

    /// Copy of the replay buffer, oldest first.
    pub async fn events(&self) -> Vec<Arc<RawValue>> {
        self.state.lock().await.history.clone()
    }

    pub async fn info(&self) -> SessionInfo {
        let state = self.state.lock().await;
        SessionInfo {
            id: self.id.clone(),
            project: self.project.clone(),
            project_path: self.project_path.clone(),
            model: self.model.clone(),
            external_session_id: state.external_session_id.clone(),
            status: state.status,
            cost_usd: state.cost_usd,
            turn_count: state.turn_count,
            event_count: state.history.len(),
            observer_count: state.observers.len(),
            created_at: unix_millis(self.created_at),
            last_active_at: unix_millis(state.last_active_at),
        }
    }

    /// Launch the agent and optionally send the first user turn.
    ///
    /// An empty `first_message` leaves the session `Ready`; otherwise it
    /// becomes `Busy`. A launch failure closes the session.
    pub async fn start(self: &Arc<Self>, first_message: &str) -> Result<(), SessionError> {
        self.begin(None, first_message).await
    }

    /// Like [`Self::start`] with no first message, continuing the agent-side
    /// conversation `external_session_id`.
    pub async fn resume(self: &Arc<Self>, external_session_id: &str) -> Result<(), SessionError> {
        self.begin(Some(external_session_id.to_string()), "").await
    }

    async fn begin(
        self: &Arc<Self>,
        resume_session: Option<String>,
        first_message: &str,
    ) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.state.lock().await;
            match state.status {
                SessionStatus::Creating => {}
                SessionStatus::Closed => return Err(self.closed()),
                SessionStatus::Ready | SessionStatus::Busy => {
                    return Err(SessionError::AlreadyStarted {
                        id: self.id.clone(),
                    });
                }
            }
            if resume_session.is_some() {
                state.external_session_id.clone_from(&resume_session);
            }
        }

        if let Err(e) = self.spawn_agent(resume_session).await {
            warn!(session_id = %self.id, error = %e, "Failed to start agent");
            self.close().await;
            return Err(e);
        }

        if first_message.is_empty() {
            let mut state = self.state.lock().await;
            state.set_status(&self.id, SessionStatus::Ready);
            Ok(())
        } else {
            self.write_user_turn(first_message).await
        }
    }

    /// Send a user turn, respawning the agent first if its process has exited.
    ///
    /// A failed respawn leaves the session `Ready` and the message unsent.
    pub async fn send_message(self: &Arc<Self>, content: &str) -> Result<(), SessionError> {
        let _lifecycle = self.lifecycle.lock().await;
        let (attached, previous_pump, resume_session) = {
            let state = self.state.lock().await;
            match state.status {
                SessionStatus::Closed => return Err(self.closed()),
                SessionStatus::Creating => {
                    return Err(SessionError::NotStarted {
                        id: self.id.clone(),
                    });
                }
                SessionStatus::Ready | SessionStatus::Busy => {}
            }
            (
                state.stdin.is_some(),
                state.pump.clone(),
                state.external_session_id.clone(),
            )
        };

        if !attached {
            if let Some(pump) = previous_pump {
                pump.wait().await;
            }
            info!(
                session_id = %self.id,
                resume_session = ?resume_session,
                "Agent process gone, respawning"
            );
            self.spawn_agent(resume_session).await?;
        }

        self.write_user_turn(content).await
    }

    /// Ask the agent to abandon its current turn. Returns the request id.
    pub async fn interrupt(&self) -> Result<String, SessionError> {
        let stdin = self.attached_stdin().await?;
        let (request_id, line) = ndjson::interrupt_request();
        self.write_line(&stdin, &line).await?;
        debug!(session_id = %self.id, %request_id, "Sent interrupt");
        Ok(request_id)
    }

    /// Answer a pending permission prompt.
    pub async fn respond_permission(
        &self,
        request_id: &str,
        allow: bool,
        updated_input: Option<Value>,
    ) -> Result<(), SessionError> {
        let stdin = self.attached_stdin().await?;
        let line = ndjson::permission_response(request_id, allow, updated_input);
        self.write_line(&stdin, &line).await?;
        debug!(session_id = %self.id, request_id, allow, "Sent permission response");
        Ok(())
    }

    /// Shut the session down for good. Calling it again does nothing.
    ///
    /// Observers receive a final `Closed` status and are then disconnected.
    pub async fn close(&self) {
        let (stdin, process, observers) = {
            let mut state = self.state.lock().await;
            if state.status == SessionStatus::Closed {
                return;
            }
            state.status = SessionStatus::Closed;
            state.touch();
            (
                state.stdin.take(),
                state.process.take(),
                state.observers.drain(),
            )
        };

        if let Some(stdin) = stdin {
            // A writer stuck on a full pipe holds this lock until the kill below.
            match stdin.try_lock() {
                Ok(mut writer) => {
                    if let Err(e) = writer.shutdown().await {
                        debug!(session_id = %self.id, error = %e, "Error closing agent stdin");
                    }
                }
                Err(_) => debug!(session_id = %self.id, "Agent stdin busy, skipping graceful close"),
            }
        }

        if let Some(process) = process {
            process.kill();
            let exit = process.wait().await;
            debug!(session_id = %self.id, code = ?exit.code, "Agent process reaped");
        }

        let closed = ServerMessage::SessionStatus {
            status: SessionStatus::Closed,
        };
        for (_, tx) in observers {
            let _ = tx.send(ObserverFrame::Message(closed.clone()));
            let _ = tx.send(ObserverFrame::Disconnect);
        }
        info!(session_id = %self.id, "Session closed");
    }

    /// Attach an observer. It receives the current status and the full
    /// replay buffer before any live event.
    pub async fn register_observer(&self, tx: ObserverSender) -> Result<ObserverId, SessionError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.status == SessionStatus::Closed {
            return Err(self.closed());
        }
        let id = state.observers.register(tx, state.status, &state.history);
        debug!(
            session_id = %self.id,
            observer = %id,
            replayed = state.history.len(),
            "Observer registered"
        );
        Ok(id)
    }

    /// Detach an observer. Unknown ids are ignored.
    pub async fn remove_observer(&self, id: ObserverId) -> bool {
        let removed = self.state.lock().await.observers.remove(id);
        if removed {
            debug!(session_id = %self.id, observer = %id, "Observer removed");
        }
        removed
    }

    /// Launch a process and attach it along with a fresh read pump.
    async fn spawn_agent(self: &Arc<Self>, resume_session: Option<String>) -> Result<(), SessionError> {
        let request = LaunchRequest {
            working_directory: self.project_path.clone(),
            model: self.model.clone(),
            resume_session,
        };
        let AgentProcess {
            stdin,
            stdout,
            handle,
        } = self.launcher.launch(&request)?;
        let (signal, completion) = pump::completion_pair();

        {
            let mut state = self.state.lock().await;
            if state.status == SessionStatus::Closed {
                drop(state);
                handle.kill();
                handle.wait().await;
                return Err(self.closed());
            }
            state.process = Some(handle.clone());
            state.stdin = Some(Arc::new(Mutex::new(stdin)));
            state.pump = Some(completion);
        }

        pump::spawn(Arc::clone(self), stdout, handle.clone(), signal);
        info!(
            session_id = %self.id,
            pid = ?handle.pid(),
            resume_session = ?request.resume_session,
            "Agent process attached"
        );
        Ok(())
    }

    /// Record and write one user turn.
    async fn write_user_turn(&self, content: &str) -> Result<(), SessionError> {
        let line = ndjson::user_turn(content);
        let event: Arc<RawValue> = RawValue::from_string(line.clone())
            .map(Arc::from)
            .map_err(|e| SessionError::Decode(e.to_string()))?;

        let stdin = {
            let mut state = self.state.lock().await;
            let Some(stdin) = state.stdin.clone() else {
                return Err(self.no_process());
            };
            state.record_event(&self.id, event);
            state.set_status(&self.id, SessionStatus::Busy);
            state.turn_count += 1;
            stdin
        };

        self.write_line(&stdin, &line).await
    }

    async fn attached_stdin(&self) -> Result<SharedStdin, SessionError> {
        let state = self.state.lock().await;
        if state.status == SessionStatus::Closed {
            return Err(self.closed());
        }
        state.stdin.clone().ok_or_else(|| self.no_process())
    }

    async fn write_line(&self, stdin: &SharedStdin, line: &str) -> Result<(), SessionError> {
        let write_err = |source| SessionError::Write {
            id: self.id.clone(),
            source,
        };
        let mut writer = stdin.lock().await;
        writer.write_all(&ndjson::frame(line)).await.map_err(write_err)?;
        writer.flush().await.map_err(write_err)
    }

    /// Ingest one stdout line. Returns `false` if it was skipped.
    pub(crate) async fn ingest_line(&self, line: String) -> bool {
        let meta = match EventMeta::extract(&line) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Skipping agent output line that is not a JSON object");
                return false;
            }
        };
        let event: Arc<RawValue> = match RawValue::from_string(line) {
            Ok(raw) => Arc::from(raw),
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Skipping undecodable agent output line");
                return false;
            }
        };

        let mut state = self.state.lock().await;
        if state.status == SessionStatus::Closed {
            return false;
        }
        state.record_event(&self.id, event);
        state.apply_meta(&self.id, &meta);
        true
    }

    /// Called by the pump once stdout ends: wait for the exit, then detach.
    pub(crate) async fn finish_process(&self, process: &ProcessHandle) {
        if self.status().await == SessionStatus::Closed {
            return;
        }
        let exit = process.wait().await;

        let mut state = self.state.lock().await;
        if state.status == SessionStatus::Closed {
            return;
        }
        state.process = None;
        state.stdin = None;
        // Observers hear about every exit, even one that finds the session idle.
        if state.status == SessionStatus::Ready {
            state.announce_status(&self.id);
        } else {
            state.set_status(&self.id, SessionStatus::Ready);
        }
        info!(
            session_id = %self.id,
            code = ?exit.code,
            "Agent process exited, session idle"
        );
    }

    fn closed(&self) -> SessionError {
        SessionError::Closed {
            id: self.id.clone(),
        }
    }

    fn no_process(&self) -> SessionError {
        SessionError::NoActiveProcess {
            id: self.id.clone(),
        }
    }
}
