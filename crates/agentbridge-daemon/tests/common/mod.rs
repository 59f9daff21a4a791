#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Shared helpers for the daemon integration tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use agentbridge_core::protocol::{ServerMessage, SessionStatus};
use agentbridge_daemon::session::{
    ObserverFrame, ObserverId, Session, SessionManager, SessionOptions,
};
use agentbridge_daemon::subprocess::FakeLauncher;

const WAIT: Duration = Duration::from_secs(5);

pub fn manager() -> (Arc<FakeLauncher>, Arc<SessionManager>) {
    manager_with(SessionOptions::default())
}

pub fn manager_with(options: SessionOptions) -> (Arc<FakeLauncher>, Arc<SessionManager>) {
    let launcher = FakeLauncher::new();
    let manager = Arc::new(SessionManager::with_options(launcher.clone(), options));
    (launcher, manager)
}

/// A registered observer backed by an in-memory queue.
pub struct Observer {
    pub id: ObserverId,
    rx: UnboundedReceiver<ObserverFrame>,
}

impl Observer {
    pub async fn join(session: &Session) -> Self {
        let (tx, rx) = unbounded_channel();
        let id = session.register_observer(tx).await.unwrap();
        Self { id, rx }
    }

    pub async fn next(&mut self) -> ObserverFrame {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an observer frame")
            .expect("observer queue closed")
    }

    pub async fn next_message(&mut self) -> ServerMessage {
        match self.next().await {
            ObserverFrame::Message(message) => message,
            ObserverFrame::Disconnect => panic!("unexpected disconnect"),
        }
    }

    pub async fn next_status(&mut self) -> SessionStatus {
        match self.next_message().await {
            ServerMessage::SessionStatus { status } => status,
            other => panic!("expected a status, got {other:?}"),
        }
    }

    pub async fn next_event(&mut self) -> Value {
        match self.next_message().await {
            ServerMessage::ClaudeEvent { event } => serde_json::from_str(event.get()).unwrap(),
            other => panic!("expected an event, got {other:?}"),
        }
    }

    /// Everything queued right now, without waiting.
    pub fn drain(&mut self) -> Vec<ObserverFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub async fn wait_for_status(session: &Session, want: SessionStatus) {
    tokio::time::timeout(WAIT, async {
        while session.status().await != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {want}"));
}

pub async fn wait_for_events(session: &Session, count: usize) {
    tokio::time::timeout(WAIT, async {
        while session.event_count().await < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never cached {count} events"));
}

/// Wait for the current read pump to finish.
pub async fn wait_for_pump(session: &Session) {
    let pump = session.pump_completion().await.expect("no pump was started");
    tokio::time::timeout(WAIT, pump.wait())
        .await
        .expect("read pump never finished");
}
