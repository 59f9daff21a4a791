//! Configuration resolution for agentbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/agentbridge/settings.json`)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the daemon binary)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default per-line ceiling for agent stdout (10 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Complete agentbridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

/// How the agent process should handle tool permission prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// `--permission-prompt-tool stdio`: prompts arrive as `control_request`
    /// events and are answered with `control_response` lines.
    #[default]
    PromptToolStdio,
    /// `--dangerously-skip-permissions`. Only safe in sandboxed environments.
    SkipPermissions,
}

impl std::str::FromStr for PermissionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prompt-tool-stdio" => Ok(Self::PromptToolStdio),
            "skip-permissions" => Ok(Self::SkipPermissions),
            other => Err(Error::Config(format!("unknown permission mode: {other}"))),
        }
    }
}

/// Agent subprocess configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Path to the `claude` binary.
    pub binary: PathBuf,
    /// Model used when a session does not request one.
    pub default_model: Option<String>,
    pub permission_mode: PermissionMode,
    /// Longest stdout line the read pump accepts.
    pub max_line_bytes: usize,
    /// Appended verbatim to every invocation.
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("claude"),
            default_model: None,
            permission_mode: PermissionMode::default(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            extra_args: Vec::new(),
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `settings_path` overrides the global settings location. A missing file is
/// not an error; a present but unreadable or malformed one is.
pub fn load_config(settings_path: Option<&Path>) -> Result<Config> {
    let path = settings_path
        .map(Path::to_path_buf)
        .or_else(global_config_path);

    let mut config = match path {
        Some(ref p) if p.exists() => load_config_file(p)?,
        _ => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Get the global settings path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("agentbridge").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = var("AGENTBRIDGE_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
        config.daemon.listen_addr = addr;
    }
    if let Some(val) = var("AGENTBRIDGE_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(val) = var("AGENTBRIDGE_AGENT_BIN") {
        config.agent.binary = PathBuf::from(val);
    }
    if let Some(val) = var("AGENTBRIDGE_DEFAULT_MODEL") {
        config.agent.default_model = Some(val).filter(|m| !m.is_empty());
    }
    if let Some(n) = var("AGENTBRIDGE_MAX_LINE_BYTES").and_then(|v| v.parse().ok()) {
        config.agent.max_line_bytes = n;
    }
}
