//! Best-effort metadata extraction from agent events.
//!
//! Tolerant reader: only `type`, `session_id` and the cost fields are looked
//! at. Every other field is skipped without being decoded, and a field with an
//! unexpected JSON type is treated as absent rather than failing the line.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::Result;

/// Event kind marking the final answer of a turn.
const TURN_RESULT: &str = "result";

/// Metadata the bridge needs from an otherwise opaque event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventMeta {
    /// The `type` discriminator.
    pub kind: Option<String>,
    /// The agent's own conversation id.
    pub session_id: Option<String>,
    /// Cost reported by this event, in USD.
    pub cost_usd: Option<f64>,
}

/// Top-level fields of an event object, values left undecoded.
type RawFields<'a> = HashMap<String, &'a RawValue>;

fn lenient<T: DeserializeOwned>(fields: &RawFields<'_>, key: &str) -> Option<T> {
    fields
        .get(key)
        .and_then(|raw| serde_json::from_str(raw.get()).ok())
}

impl EventMeta {
    /// Extract metadata from one NDJSON line.
    ///
    /// Fails only when the line is not a JSON object.
    pub fn extract(line: &str) -> Result<Self> {
        let fields: RawFields<'_> = serde_json::from_str(line)?;
        let session_id = lenient::<String>(&fields, "session_id").filter(|s| !s.is_empty());
        let cost_usd = lenient::<f64>(&fields, "cost_usd")
            .or_else(|| lenient(&fields, "total_cost_usd"));
        Ok(Self {
            kind: lenient(&fields, "type"),
            session_id,
            cost_usd,
        })
    }

    /// Whether this event is the agent's final answer for the current turn.
    pub fn is_turn_result(&self) -> bool {
        self.kind.as_deref() == Some(TURN_RESULT)
    }
}
