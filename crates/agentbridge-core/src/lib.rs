//! `agentbridge` Core Library
//!
//! Shared functionality for the agentbridge daemon and its tests:
//! - NDJSON control protocol for Claude Code stream-json mode
//! - Observer wire protocol
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod ndjson;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{ObserverCommand, ProtocolError, ServerMessage, SessionStatus};
