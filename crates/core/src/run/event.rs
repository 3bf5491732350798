//! Raw run events emitted by the execution engine
//!
//! The engine assigns a strictly increasing per-run `seq`; the gateway keeps
//! it as an ordering hint for external consumers and never reorders.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stream a raw event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStream {
    Lifecycle,
    Assistant,
    Tool,
    Context,
}

/// One raw event as produced by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEventEnvelope {
    pub run_id: String,
    pub seq: u64,
    pub stream: RunStream,
    pub ts_ms: i64,
    pub data: Value,
}

impl RunEventEnvelope {
    /// `start` / `end` phase of a lifecycle event, if present.
    pub fn lifecycle_phase(&self) -> Option<&str> {
        self.data.get("phase").and_then(Value::as_str)
    }

    /// Textual content of an assistant event, if present and non-empty.
    pub fn assistant_text(&self) -> Option<&str> {
        self.data
            .get("text")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
    }

    /// Whether this assistant event carries the completed message.
    pub fn is_final_message(&self) -> bool {
        self.data
            .get("final")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Tool phase (`start`, `update`, `result`), if present.
    pub fn tool_phase(&self) -> Option<&str> {
        self.data.get("phase").and_then(Value::as_str)
    }

    /// Opaque tool call id correlating tool events, if present.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.data.get("toolCallId").and_then(Value::as_str)
    }
}
