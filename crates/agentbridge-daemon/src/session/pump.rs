//! Stdout read pump.
//!
//! One pump per agent process. It drains stdout line by line into the owning
//! session and, once stdout ends, waits for the process to exit before the
//! session drops its handles. The completion signal fires exactly once when
//! the pump is done, whatever the reason.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::bridge::Session;
use crate::subprocess::{AgentStdout, ProcessHandle};

/// Raised by the pump when it finishes.
pub(crate) struct CompletionSignal(watch::Sender<bool>);

impl CompletionSignal {
    fn raise(self) {
        self.0.send_replace(true);
    }
}

/// Awaitable view of a pump's completion signal.
#[derive(Debug, Clone)]
pub struct PumpCompletion(watch::Receiver<bool>);

impl PumpCompletion {
    /// Resolves once the pump has finished.
    pub async fn wait(&self) {
        let mut rx = self.0.clone();
        // A dropped sender means the pump task is gone, which is also done.
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.0.borrow()
    }
}

pub(crate) fn completion_pair() -> (CompletionSignal, PumpCompletion) {
    let (tx, rx) = watch::channel(false);
    (CompletionSignal(tx), PumpCompletion(rx))
}

/// Outcome of reading one newline-delimited line.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A complete line, terminator stripped.
    Line,
    /// The line exceeded the limit and was discarded up to its terminator.
    TooLong,
    Eof,
}

/// Read one line into `buf`, holding at most `limit` bytes of it in memory.
async fn read_bounded_line<R>(reader: &mut R, limit: usize, buf: &mut Vec<u8>) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let n = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(LineRead::Line);
    }
    if buf.len() <= limit {
        // Final line without a terminator.
        return Ok(LineRead::Line);
    }

    // Skip the rest of the oversized line.
    loop {
        buf.clear();
        let n = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            buf.clear();
            return Ok(LineRead::TooLong);
        }
    }
}

/// Spawn the read pump for one agent process.
pub(crate) fn spawn(
    session: Arc<Session>,
    stdout: AgentStdout,
    process: ProcessHandle,
    done: CompletionSignal,
) {
    tokio::spawn(async move {
        let session_id = session.id().to_string();
        let limit = session.max_line_bytes();
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut accepted: u64 = 0;

        loop {
            match read_bounded_line(&mut reader, limit, &mut buf).await {
                Ok(LineRead::Line) => {}
                Ok(LineRead::TooLong) => {
                    warn!(session_id = %session_id, limit, "Skipping oversized agent output line");
                    continue;
                }
                Ok(LineRead::Eof) => {
                    debug!(session_id = %session_id, "Agent stdout closed");
                    break;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Error reading agent stdout");
                    break;
                }
            }

            let Ok(line) = std::str::from_utf8(&buf) else {
                warn!(session_id = %session_id, "Skipping non-UTF-8 agent output line");
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            if session.ingest_line(line.to_owned()).await {
                accepted += 1;
            }
        }

        // A still-writing agent would block on a full pipe and never exit.
        drop(reader);
        session.finish_process(&process).await;
        info!(session_id = %session_id, accepted, "Read pump finished");
        done.raise();
    });
}
