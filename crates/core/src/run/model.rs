//! Run status, execution mode and metrics types

use serde::{Deserialize, Serialize};

/// Status of one logical run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Accepted,
    Running,
    Ok,
    Error,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Error | Self::Timeout)
    }
}

/// One-shot request/response versus long-lived event-streamed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Stream,
    Unary,
}

/// The externally requested operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Chat,
    Run,
}

impl Operation {
    /// Default transport mode when the caller does not pick one.
    pub fn default_mode(&self) -> ExecutionMode {
        match self {
            Self::Chat => ExecutionMode::Stream,
            Self::Run => ExecutionMode::Unary,
        }
    }
}

/// Per-run verbosity controlling how much tool-execution detail leaves the
/// process beyond the live UI broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerboseLevel {
    Off,
    #[default]
    On,
    Full,
}

impl VerboseLevel {
    /// Whether `result`/`partialResult` payload fields are stripped from
    /// normalized tool events before delivery.
    pub fn strips_output(&self) -> bool {
        matches!(self, Self::Off | Self::On)
    }

    /// Whether tool events are forwarded to session/channel subscribers.
    /// Registered WS recipients receive them at every level.
    pub fn forwards_to_session(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Terminal metrics reported with a run's end event and unary response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub accepted_at_ms: i64,
    pub first_token_ms: Option<i64>,
    pub total_ms: i64,
    pub tool_count: Option<u32>,
    pub execution_mode: ExecutionMode,
}

/// Snapshot of one run's lifecycle, observable via `agent.wait`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJob {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
