//! agentbridge daemon
//!
//! Serves the session API over HTTP and WebSocket and owns every agent
//! process it launches.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use agentbridge_core::config::{self, PermissionMode};
use agentbridge_core::tracing_init;
use agentbridge_daemon::server::{AppState, build_router};
use agentbridge_daemon::session::{SessionManager, SessionOptions};
use agentbridge_daemon::subprocess::ClaudeLauncher;

#[derive(Parser, Debug)]
#[command(name = "agentbridge-daemon")]
#[command(version, about = "agentbridge daemon - Claude Code session bridge")]
struct Args {
    /// Settings file (defaults to the global `agentbridge/settings.json`)
    #[arg(long, env = "AGENTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to the `claude` CLI binary
    #[arg(long)]
    claude_bin: Option<PathBuf>,

    /// Model used when a session does not ask for one
    #[arg(long)]
    model: Option<String>,

    /// Permission strategy for agent processes
    #[arg(long, value_parser = ["prompt-tool-stdio", "skip-permissions"])]
    permission_mode: Option<String>,

    /// Longest agent output line accepted, in bytes
    #[arg(long)]
    max_line_bytes: Option<usize>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.daemon.listen_addr = addr;
    }
    if let Some(bin) = args.claude_bin {
        config.agent.binary = bin;
    }
    if let Some(model) = args.model {
        config.agent.default_model = Some(model);
    }
    if let Some(mode) = args.permission_mode {
        config.agent.permission_mode = mode.parse::<PermissionMode>()?;
    }
    if let Some(n) = args.max_line_bytes {
        config.agent.max_line_bytes = n;
    }
    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    config.daemon.log_json |= args.log_json;

    tracing_init::init_tracing(
        &tracing_init::filter_for_level(&config.daemon.log_level),
        config.daemon.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.daemon.listen_addr,
        agent = %config.agent.binary.display(),
        permission_mode = ?config.agent.permission_mode,
        "Starting agentbridge-daemon"
    );

    let launcher = Arc::new(ClaudeLauncher::from_config(&config.agent));
    let manager = Arc::new(SessionManager::with_options(
        launcher,
        SessionOptions {
            max_line_bytes: config.agent.max_line_bytes,
        },
    ));
    let app = build_router(AppState::new(Arc::clone(&manager)));
    let listener = tokio::net::TcpListener::bind(config.daemon.listen_addr).await?;

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so agent processes don't notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!(addr = %config.daemon.listen_addr, "HTTP server ready");

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    manager.close_all().await;
    info!("Daemon stopped");
    Ok(())
}
