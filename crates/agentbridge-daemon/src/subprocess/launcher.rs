//! Claude Code process launcher.
//!
//! Builds the stream-json invocation, scrubs the inherited environment and
//! wires stdin/stdout as pipes owned by the caller. Owns no session state.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tracing::{info, warn};

use agentbridge_core::config::{AgentConfig, PermissionMode};

use super::process::ProcessHandle;

/// Variables that make a spawned agent believe it is running inside another
/// agent host.
pub const HOST_MARKER_VARS: [&str; 2] = ["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// What to launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Working directory for the agent process.
    pub working_directory: PathBuf,
    /// Model override.
    pub model: Option<String>,
    /// Agent-side conversation to resume.
    pub resume_session: Option<String>,
}

/// Writer half feeding the agent's stdin.
pub type AgentStdin = Box<dyn AsyncWrite + Send + Unpin>;
/// Reader half draining the agent's stdout.
pub type AgentStdout = Box<dyn AsyncRead + Send + Unpin>;

/// A freshly started agent process and its pipes.
pub struct AgentProcess {
    pub stdin: AgentStdin,
    pub stdout: AgentStdout,
    pub handle: ProcessHandle,
}

impl std::fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProcess")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Errors from launching an agent process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn agent process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Failed to capture agent {stream}")]
    PipeUnavailable { stream: &'static str },
}

/// Starts agent processes.
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<AgentProcess, LaunchError>;
}

/// Launches the real `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeLauncher {
    binary: PathBuf,
    permission_mode: PermissionMode,
    default_model: Option<String>,
    extra_args: Vec<String>,
}

impl ClaudeLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            permission_mode: PermissionMode::default(),
            default_model: None,
            extra_args: Vec::new(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            permission_mode: config.permission_mode,
            default_model: config.default_model.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Build the command without spawning it.
    pub fn command(&self, request: &LaunchRequest) -> Command {
        let working_dir = resolve_working_dir(&request.working_directory);
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&working_dir)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--verbose")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Nobody drains stderr; a full pipe would stall the agent.
            .stderr(Stdio::null());

        for var in HOST_MARKER_VARS {
            cmd.env_remove(var);
        }

        match self.permission_mode {
            PermissionMode::PromptToolStdio => {
                cmd.arg("--permission-prompt-tool").arg("stdio");
            }
            PermissionMode::SkipPermissions => {
                cmd.arg("--dangerously-skip-permissions");
            }
        }

        if let Some(model) = request.model.as_ref().or(self.default_model.as_ref()) {
            cmd.arg("--model").arg(model);
        }

        if let Some(ref session) = request.resume_session {
            cmd.arg("--resume").arg(session);
        }

        cmd.args(&self.extra_args);
        cmd
    }
}

impl Launcher for ClaudeLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<AgentProcess, LaunchError> {
        let mut cmd = self.command(request);

        info!(
            binary = %self.binary.display(),
            working_dir = %request.working_directory.display(),
            resume_session = ?request.resume_session,
            model = ?request.model,
            "Spawning agent process"
        );
        let mut child = cmd.spawn().map_err(|e| LaunchError::SpawnFailed {
            reason: e.to_string(),
        })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.start_kill();
            return Err(LaunchError::PipeUnavailable { stream: "stdin" });
        };
        let Some(stdout) = child.stdout.take() else {
            drop(stdin);
            let _ = child.start_kill();
            return Err(LaunchError::PipeUnavailable { stream: "stdout" });
        };

        let handle = ProcessHandle::supervise(child);
        Ok(AgentProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            handle,
        })
    }
}

/// Fall back to the home directory (then the temp directory) when the
/// requested working directory is empty or missing.
fn resolve_working_dir(requested: &Path) -> PathBuf {
    if !requested.as_os_str().is_empty() && requested.exists() {
        return requested.to_path_buf();
    }
    let fallback = dirs::home_dir().unwrap_or_else(|| {
        warn!("dirs::home_dir() returned None; falling back to temp_dir for working directory");
        std::env::temp_dir()
    });
    warn!(
        requested = %requested.display(),
        fallback = %fallback.display(),
        "Working directory missing or empty, using fallback"
    );
    fallback
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn argv(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn request(dir: &Path) -> LaunchRequest {
        LaunchRequest {
            working_directory: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn base_invocation_uses_stream_json_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ClaudeLauncher::new("claude").command(&request(dir.path()));
        assert_eq!(
            argv(&cmd),
            [
                "--output-format",
                "stream-json",
                "--input-format",
                "stream-json",
                "--verbose",
                "--permission-prompt-tool",
                "stdio",
            ]
        );
        assert_eq!(cmd.as_std().get_current_dir(), Some(dir.path()));
    }

    #[test]
    fn model_and_resume_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let req = LaunchRequest {
            model: Some("opus".into()),
            resume_session: Some("ext-1".into()),
            ..request(dir.path())
        };
        let args = argv(&ClaudeLauncher::new("claude").command(&req));
        let tail = &args[args.len() - 4..];
        assert_eq!(tail, ["--model", "opus", "--resume", "ext-1"]);
    }

    #[test]
    fn default_model_applies_only_without_override() {
        let config = AgentConfig {
            default_model: Some("sonnet".into()),
            permission_mode: PermissionMode::SkipPermissions,
            extra_args: vec!["--max-turns".into(), "3".into()],
            ..AgentConfig::default()
        };
        let launcher = ClaudeLauncher::from_config(&config);
        let dir = tempfile::tempdir().unwrap();

        let args = argv(&launcher.command(&request(dir.path())));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(args.windows(2).any(|w| w == ["--model", "sonnet"]));
        assert_eq!(&args[args.len() - 2..], ["--max-turns", "3"]);

        let req = LaunchRequest {
            model: Some("opus".into()),
            ..request(dir.path())
        };
        let args = argv(&launcher.command(&req));
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(!args.contains(&"sonnet".to_string()));
    }

    #[test]
    fn host_markers_are_removed_from_environment() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ClaudeLauncher::new("claude").command(&request(dir.path()));
        let removed: Vec<&OsStr> = cmd
            .as_std()
            .get_envs()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key)
            .collect();
        for var in HOST_MARKER_VARS {
            assert!(removed.contains(&OsStr::new(var)), "{var} not removed");
        }
    }

    #[test]
    fn missing_working_dir_falls_back() {
        let resolved = resolve_working_dir(Path::new("/definitely/not/here"));
        assert_ne!(resolved, PathBuf::from("/definitely/not/here"));
        assert_eq!(resolve_working_dir(Path::new("")), resolved);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ClaudeLauncher::new(dir.path().join("no-such-claude"));
        let err = launcher.launch(&request(dir.path())).unwrap_err();
        assert!(matches!(err, LaunchError::SpawnFailed { .. }));
    }
}
