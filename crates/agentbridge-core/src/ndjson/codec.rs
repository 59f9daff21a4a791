//! Outbound message builders.
//!
//! Every builder returns exactly one JSON object rendered on a single line,
//! without the trailing newline. [`frame`] adds the terminator right before
//! the bytes hit the agent's stdin.

use serde_json::{Value, json};

/// Reason attached to every denied permission prompt.
pub const DENIAL_MESSAGE: &str = "User denied permission";

/// Generate a fresh control request id.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

/// A user turn: `{"type":"user","message":{"role":"user","content":...}}`.
pub fn user_turn(content: &str) -> String {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content,
        },
    })
    .to_string()
}

/// An interrupt control request. Returns the generated request id with the line.
pub fn interrupt_request() -> (String, String) {
    control_request("interrupt")
}

fn control_request(subtype: &str) -> (String, String) {
    let request_id = new_request_id();
    let line = json!({
        "type": "control_request",
        "request_id": request_id,
        "request": { "subtype": subtype },
    })
    .to_string();
    (request_id, line)
}

/// Answer to a `can_use_tool` prompt.
///
/// Allow carries `updated_input` only when the caller supplied one. Deny never
/// carries input and always carries [`DENIAL_MESSAGE`].
pub fn permission_response(
    request_id: &str,
    allow: bool,
    updated_input: Option<Value>,
) -> String {
    let response = if allow {
        let mut body = json!({ "behavior": "allow" });
        if let Some(input) = updated_input {
            body["updated_input"] = input;
        }
        body
    } else {
        json!({
            "behavior": "deny",
            "message": DENIAL_MESSAGE,
        })
    };

    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    })
    .to_string()
}

/// Terminate a line for newline-delimited framing.
pub fn frame(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line.as_bytes());
    buf.push(b'\n');
    buf
}
