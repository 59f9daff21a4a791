//! NDJSON control protocol for Claude Code stream-json mode.
//!
//! Outbound lines (user turns, control requests, control responses) are built
//! by [`codec`]; inbound events stay opaque apart from the handful of fields
//! [`EventMeta`] extracts.

mod codec;
mod meta;

pub use codec::{
    DENIAL_MESSAGE, frame, interrupt_request, new_request_id, permission_response, user_turn,
};
pub use meta::EventMeta;
