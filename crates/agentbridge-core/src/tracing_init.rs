//! Tracing/logging initialization.
//!
//! The daemon installs one `tracing_subscriber` registry at startup: an
//! env-filter (honouring `RUST_LOG`) plus either the human-readable or the
//! JSON formatter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose spans and events are enabled by [`filter_for_level`].
const BRIDGE_TARGETS: [&str; 2] = ["agentbridge_daemon", "agentbridge_core"];

/// Build the default filter directive for the bridge crates at `level`.
///
/// `filter_for_level("debug")` yields
/// `"agentbridge_daemon=debug,agentbridge_core=debug"`.
pub fn filter_for_level(level: &str) -> String {
    BRIDGE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is not set
///   (usually the output of [`filter_for_level`]).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_covers_both_crates() {
        assert_eq!(
            filter_for_level("warn"),
            "agentbridge_daemon=warn,agentbridge_core=warn"
        );
    }
}
