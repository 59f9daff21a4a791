//! In-memory launcher for tests.
//!
//! Each launch creates a [`FakeAgent`] connected to the bridge through duplex
//! pipes. Tests pull agents from the launcher in launch order, read what the
//! bridge wrote to stdin, emit stdout lines and decide when the "process"
//! exits. A kill request closes stdout and reports an exit on its own, so
//! `close()` never depends on the test reacting.

#![allow(clippy::panic, clippy::expect_used)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadBuf,
};
use tokio::sync::{mpsc, watch};

use super::launcher::{AgentProcess, LaunchError, LaunchRequest, Launcher};
use super::process::{ProcessExit, ProcessHandle, report_exit};

const PIPE_CAPACITY: usize = 256 * 1024;
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

type SharedStdout = Arc<tokio::sync::Mutex<Option<DuplexStream>>>;

/// Bridge end of a fake agent's stdout. Reads fail once `fault` is set, and
/// `released` flips when the bridge drops it.
struct BridgeStdout {
    inner: DuplexStream,
    fault: Arc<AtomicBool>,
    released: Arc<AtomicBool>,
}

impl AsyncRead for BridgeStdout {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.fault.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "fake stdout broke",
            )));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl Drop for BridgeStdout {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Launcher producing in-memory agents.
pub struct FakeLauncher {
    requests: Mutex<Vec<LaunchRequest>>,
    fail_next: Mutex<Option<String>>,
    agents_tx: mpsc::UnboundedSender<FakeAgent>,
    agents_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeAgent>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        let (agents_tx, agents_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            agents_tx,
            agents_rx: tokio::sync::Mutex::new(agents_rx),
        })
    }

    /// Make the next launch fail with `reason`.
    pub fn fail_next_launch(&self, reason: &str) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    /// Every launch attempt so far, including failed ones.
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn launch_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The next successfully launched agent, in launch order.
    pub async fn next_agent(&self) -> FakeAgent {
        let mut rx = self.agents_rx.lock().await;
        tokio::time::timeout(STEP_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a launch")
            .expect("launcher dropped")
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<AgentProcess, LaunchError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if let Some(reason) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(LaunchError::SpawnFailed { reason });
        }

        let (bridge_stdin, agent_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (agent_stdout, bridge_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (handle, mut reporter) = ProcessHandle::detached();
        let stdout: SharedStdout = Arc::new(tokio::sync::Mutex::new(Some(agent_stdout)));
        let exit_tx = reporter.exit_sender();
        let stdout_fault = Arc::new(AtomicBool::new(false));
        let stdout_released = Arc::new(AtomicBool::new(false));

        let kill_stdout = Arc::clone(&stdout);
        let kill_exit = Arc::clone(&exit_tx);
        tokio::spawn(async move {
            if reporter.kill_requested().await {
                kill_stdout.lock().await.take();
                report_exit(&kill_exit, ProcessExit::UNKNOWN);
            }
        });

        let agent = FakeAgent {
            request: request.clone(),
            stdin: BufReader::new(agent_stdin).lines(),
            stdout,
            exit_tx,
            handle: handle.clone(),
            stdout_fault: Arc::clone(&stdout_fault),
            stdout_released: Arc::clone(&stdout_released),
        };
        let _ = self.agents_tx.send(agent);

        Ok(AgentProcess {
            stdin: Box::new(bridge_stdin),
            stdout: Box::new(BridgeStdout {
                inner: bridge_stdout,
                fault: stdout_fault,
                released: stdout_released,
            }),
            handle,
        })
    }
}

/// The agent side of one fake launch.
pub struct FakeAgent {
    pub request: LaunchRequest,
    stdin: Lines<BufReader<DuplexStream>>,
    stdout: SharedStdout,
    exit_tx: Arc<watch::Sender<Option<ProcessExit>>>,
    handle: ProcessHandle,
    stdout_fault: Arc<AtomicBool>,
    stdout_released: Arc<AtomicBool>,
}

impl FakeAgent {
    /// Next line the bridge wrote to stdin, `None` once stdin is closed.
    pub async fn next_line(&mut self) -> Option<String> {
        tokio::time::timeout(STEP_TIMEOUT, self.stdin.next_line())
            .await
            .expect("timed out waiting for stdin")
            .expect("stdin read failed")
    }

    /// Next stdin line decoded as JSON.
    pub async fn next_json(&mut self) -> serde_json::Value {
        let line = self.next_line().await.expect("stdin closed");
        serde_json::from_str(&line).expect("bridge wrote invalid JSON")
    }

    /// Write one line to stdout.
    pub async fn emit(&self, line: &str) {
        let mut guard = self.stdout.lock().await;
        let out = guard.as_mut().expect("stdout already closed");
        out.write_all(line.as_bytes()).await.expect("stdout write");
        out.write_all(b"\n").await.expect("stdout write");
        out.flush().await.expect("stdout flush");
    }

    /// Make the bridge's next stdout read fail. The process stays alive.
    pub async fn break_stdout(&self) {
        self.stdout_fault.store(true, Ordering::SeqCst);
        // Wake a reader parked on the pipe.
        if let Some(out) = self.stdout.lock().await.as_mut() {
            let _ = out.write_all(b"\n").await;
        }
    }

    /// Whether the bridge has dropped its end of stdout.
    pub fn stdout_released(&self) -> bool {
        self.stdout_released.load(Ordering::SeqCst)
    }

    /// Close stdout without reporting an exit yet.
    pub async fn close_stdout(&self) {
        self.stdout.lock().await.take();
    }

    /// Report the process as exited without touching stdout.
    pub fn report_exit(&self, code: i32) {
        report_exit(&self.exit_tx, ProcessExit { code: Some(code) });
    }

    /// End the turn the way the real agent does: close stdout, then exit.
    pub async fn exit(&self, code: i32) {
        self.close_stdout().await;
        self.report_exit(code);
    }

    /// Whether the bridge asked for this process to be killed (and it died).
    pub fn was_killed(&self) -> bool {
        self.handle.has_exited() && self.exit_tx.borrow().is_some_and(|e| e.code.is_none())
    }
}
