//! Shared handle to a running agent process.
//!
//! The OS child is owned by a reaper task. Everyone else holds a cloneable
//! [`ProcessHandle`] that can request force-termination and await the exit,
//! so the read pump and `close()` can both wait on the same process without
//! sharing a lock.

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How an agent process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when killed by a signal or the status was unavailable.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub const UNKNOWN: Self = Self { code: None };

    pub const fn success(self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Cloneable handle to one agent process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Take ownership of `child` and supervise it until it exits.
    pub fn supervise(mut child: Child) -> Self {
        let pid = child.id();
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Some(()) = kill_rx.recv() => {
                    debug!(?pid, "Force-killing agent process");
                    if let Err(e) = child.start_kill() {
                        warn!(?pid, error = %e, "Failed to kill agent process");
                    }
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => ProcessExit {
                    code: status.code(),
                },
                Err(e) => {
                    warn!(?pid, error = %e, "Error waiting for agent process");
                    ProcessExit::UNKNOWN
                }
            };
            info!(?pid, code = ?exit.code, "Agent process exited");
            exit_tx.send_replace(Some(exit));
        });

        Self {
            pid,
            kill_tx,
            exit_rx,
        }
    }

    /// A handle whose exit is reported by hand, for in-memory agents.
    #[cfg(any(test, feature = "test-utils"))]
    pub(crate) fn detached() -> (Self, ExitReporter) {
        let (kill_tx, kill_rx) = mpsc::channel::<()>(1);
        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = Self {
            pid: None,
            kill_tx,
            exit_rx,
        };
        let reporter = ExitReporter {
            exit_tx: std::sync::Arc::new(exit_tx),
            kill_rx,
        };
        (handle, reporter)
    }

    /// OS process id, if the process was started by the OS.
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request force-termination. Does not wait; pair with [`Self::wait`].
    pub fn kill(&self) {
        // A full channel means a kill is already pending.
        let _ = self.kill_tx.try_send(());
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait until the process has fully exited.
    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.unwrap_or(ProcessExit::UNKNOWN),
            // Reaper gone without reporting: nothing left to wait for.
            Err(_) => ProcessExit::UNKNOWN,
        }
    }
}

/// The reaper side of a [`ProcessHandle::detached`] handle.
#[cfg(any(test, feature = "test-utils"))]
pub(crate) struct ExitReporter {
    exit_tx: std::sync::Arc<watch::Sender<Option<ProcessExit>>>,
    kill_rx: mpsc::Receiver<()>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ExitReporter {
    pub(crate) fn exit_sender(&self) -> std::sync::Arc<watch::Sender<Option<ProcessExit>>> {
        std::sync::Arc::clone(&self.exit_tx)
    }

    /// Resolves when a kill is requested; `false` if every handle is gone.
    pub(crate) async fn kill_requested(&mut self) -> bool {
        self.kill_rx.recv().await.is_some()
    }
}

/// Record an exit once. Later reports are ignored.
#[cfg(any(test, feature = "test-utils"))]
pub(crate) fn report_exit(exit_tx: &watch::Sender<Option<ProcessExit>>, exit: ProcessExit) {
    exit_tx.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(exit);
        true
    });
}
