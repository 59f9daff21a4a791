//! Directory of live sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::bridge::Session;
use super::types::{SessionError, SessionInfo, SessionOptions};
use crate::subprocess::Launcher;

/// Owns every session and the launcher they share.
///
/// The directory lock is never held while a session is locked or closed.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    launcher: Arc<dyn Launcher>,
    options: SessionOptions,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self::with_options(launcher, SessionOptions::default())
    }

    pub fn with_options(launcher: Arc<dyn Launcher>, options: SessionOptions) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            launcher,
            options,
        }
    }

    /// Register a new session in `Creating`. Nothing is launched yet.
    pub async fn create(
        &self,
        project: &str,
        project_path: impl Into<PathBuf>,
        model: Option<String>,
    ) -> Arc<Session> {
        let id = Uuid::now_v7().to_string();
        let session = Session::new(
            id.clone(),
            project.to_string(),
            project_path.into(),
            model,
            Arc::clone(&self.launcher),
            self.options,
        );
        self.sessions.write().await.insert(id, Arc::clone(&session));
        info!(session_id = %session.id(), project, "Session created");
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Like [`Self::get`], failing with `NotFound`.
    pub async fn require(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.get(id)
            .await
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Snapshot of every session, oldest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos
    }

    /// Close and forget a session.
    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        session.close().await;
        info!(session_id = id, "Session deleted");
        Ok(())
    }

    /// Create a session that continues agent-side conversation
    /// `external_session_id`. On failure nothing stays registered.
    pub async fn resume(
        &self,
        external_session_id: &str,
        project: &str,
        project_path: impl Into<PathBuf>,
        model: Option<String>,
    ) -> Result<Arc<Session>, SessionError> {
        let session = self.create(project, project_path, model).await;
        if let Err(e) = session.resume(external_session_id).await {
            self.sessions.write().await.remove(session.id());
            return Err(e);
        }
        Ok(session)
    }

    /// Close every session concurrently and wait for all of them.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
        info!(count, "Closed all sessions");
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::subprocess::FakeLauncher;
    use agentbridge_core::protocol::SessionStatus;

    #[tokio::test]
    async fn create_registers_in_creating_without_launching() {
        let launcher = FakeLauncher::new();
        let manager = SessionManager::new(launcher.clone());
        let session = manager.create("demo", "/tmp/demo", None).await;

        assert_eq!(session.status().await, SessionStatus::Creating);
        assert_eq!(launcher.launch_count(), 0);
        assert!(manager.get(session.id()).await.is_some());
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let manager = SessionManager::new(FakeLauncher::new());
        let a = manager.create("a", "/tmp", None).await;
        let b = manager.create("b", "/tmp", None).await;
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let manager = SessionManager::new(FakeLauncher::new());
        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            ids.push(manager.create(name, "/tmp", None).await.id().to_string());
        }
        let listed: Vec<String> = manager.list().await.into_iter().map(|i| i.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn delete_closes_and_forgets() {
        let manager = SessionManager::new(FakeLauncher::new());
        let session = manager.create("demo", "/tmp", None).await;
        let id = session.id().to_string();

        manager.delete(&id).await.unwrap();

        assert_eq!(session.status().await, SessionStatus::Closed);
        assert!(manager.get(&id).await.is_none());
        assert!(matches!(
            manager.delete(&id).await,
            Err(SessionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_resume_is_rolled_back() {
        let launcher = FakeLauncher::new();
        launcher.fail_next_launch("no binary");
        let manager = SessionManager::new(launcher.clone());

        let err = manager.resume("ext-9", "demo", "/tmp", None).await.unwrap_err();

        assert!(matches!(err, SessionError::Launch(_)));
        assert!(manager.is_empty().await);
        assert_eq!(
            launcher.launches()[0].resume_session.as_deref(),
            Some("ext-9")
        );
    }

    #[tokio::test]
    async fn resume_starts_ready_with_external_id() {
        let launcher = FakeLauncher::new();
        let manager = SessionManager::new(launcher.clone());

        let session = manager.resume("ext-1", "demo", "/tmp", None).await.unwrap();

        assert_eq!(session.status().await, SessionStatus::Ready);
        assert_eq!(session.external_session_id().await.as_deref(), Some("ext-1"));
        let agent = launcher.next_agent().await;
        assert_eq!(agent.request.resume_session.as_deref(), Some("ext-1"));
    }

    #[tokio::test]
    async fn close_all_closes_every_session() {
        let launcher = FakeLauncher::new();
        let manager = SessionManager::new(launcher.clone());
        let a = manager.create("a", "/tmp", None).await;
        let b = manager.create("b", "/tmp", None).await;
        a.start("").await.unwrap();
        b.start("hello").await.unwrap();

        manager.close_all().await;

        assert_eq!(a.status().await, SessionStatus::Closed);
        assert_eq!(b.status().await, SessionStatus::Closed);
        for _ in 0..2 {
            assert!(launcher.next_agent().await.was_killed());
        }
    }
}
