//! Agent subprocess launching and supervision.

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod launcher;
pub mod process;

#[cfg(any(test, feature = "test-utils"))]
pub use fake::{FakeAgent, FakeLauncher};
pub use launcher::{
    AgentProcess, AgentStdin, AgentStdout, ClaudeLauncher, LaunchError, LaunchRequest, Launcher,
};
pub use process::{ProcessExit, ProcessHandle};
