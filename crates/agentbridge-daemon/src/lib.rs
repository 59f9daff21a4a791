//! agentbridge daemon library
//!
//! Bridges long-lived Claude Code conversations to any number of observers:
//! - Subprocess launching and supervision for the agent CLI
//! - Sessions with replay buffers and ordered observer fan-out
//! - HTTP + WebSocket surface over the session manager

pub mod server;
pub mod session;
pub mod subprocess;
