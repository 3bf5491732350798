//! Execution engine seam
//!
//! The gateway never talks to a model runtime directly; it hands an
//! [`EngineRequest`] to whatever implements [`ExecutionEngine`] and consumes
//! the run's event stream through the channel embedded in the request.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use gateway_core::run::{ExecutionMode, RunEventEnvelope};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine timed out after {0}ms")]
    Timeout(u64),
    #[error("engine failed: {0}")]
    Failed(String),
}

/// Everything an engine needs to service one run.
pub struct EngineRequest {
    pub run_id: String,
    pub session_key: String,
    pub agent_id: String,
    pub message: String,
    pub images: Vec<Value>,
    pub thinking: Option<String>,
    pub timeout_ms: Option<u64>,
    pub lane: Option<String>,
    pub extra_system_prompt: Option<String>,
    pub mode: ExecutionMode,
    /// Raw event sink for this run. Engines emit lifecycle, assistant, tool
    /// and context envelopes here; the normalizer does the rest.
    pub events: mpsc::Sender<RunEventEnvelope>,
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Service a run to completion. For streaming runs the terminal
    /// lifecycle event on `request.events` is the source of truth; the
    /// returned value carries the final assistant text for unary callers.
    async fn execute(&self, request: EngineRequest) -> Result<EngineOutcome, EngineError>;
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub text: String,
}

/// Default engine wired in when no model runtime is configured. Echoes the
/// message back through a full lifecycle so the gateway surface can be
/// exercised end to end.
pub struct EchoEngine;

#[async_trait]
impl ExecutionEngine for EchoEngine {
    async fn execute(&self, request: EngineRequest) -> Result<EngineOutcome, EngineError> {
        use gateway_core::run::RunStream;
        use serde_json::json;

        let text = format!("echo: {}", request.message);
        let frames = [
            (RunStream::Lifecycle, json!({"phase": "start"})),
            (RunStream::Assistant, json!({"text": text, "final": true})),
            (RunStream::Lifecycle, json!({"phase": "end", "status": "ok"})),
        ];
        for (seq, (stream, data)) in frames.into_iter().enumerate() {
            let _ = request
                .events
                .send(RunEventEnvelope {
                    run_id: request.run_id.clone(),
                    seq: seq as u64 + 1,
                    stream,
                    ts_ms: gateway_core::now_ms(),
                    data,
                })
                .await;
        }
        Ok(EngineOutcome { text })
    }
}

#[cfg(test)]
pub mod stub {
    use super::*;
    use gateway_core::run::RunStream;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Scripted engine for handler tests. Replays a fixed event sequence
    /// and returns a canned outcome, recording every request it saw.
    pub struct StubEngine {
        pub outcome: Result<String, String>,
        pub events: Vec<(RunStream, Value)>,
        pub seen: Mutex<Vec<String>>,
    }

    impl StubEngine {
        pub fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(text.to_string()),
                events: Vec::new(),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(message.to_string()),
                events: Vec::new(),
                seen: Mutex::new(Vec::new()),
            })
        }

        pub fn scripted(text: &str, events: Vec<(RunStream, Value)>) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(text.to_string()),
                events,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExecutionEngine for StubEngine {
        async fn execute(&self, request: EngineRequest) -> Result<EngineOutcome, EngineError> {
            self.seen.lock().await.push(request.message.clone());
            let mut seq = 0u64;
            for (stream, data) in &self.events {
                seq += 1;
                let _ = request
                    .events
                    .send(RunEventEnvelope {
                        run_id: request.run_id.clone(),
                        seq,
                        stream: *stream,
                        ts_ms: gateway_core::now_ms(),
                        data: data.clone(),
                    })
                    .await;
            }
            match &self.outcome {
                Ok(text) => {
                    if self.events.is_empty() {
                        let _ = request
                            .events
                            .send(RunEventEnvelope {
                                run_id: request.run_id.clone(),
                                seq: seq + 1,
                                stream: RunStream::Assistant,
                                ts_ms: gateway_core::now_ms(),
                                data: json!({"text": text, "final": true}),
                            })
                            .await;
                    }
                    Ok(EngineOutcome { text: text.clone() })
                }
                Err(message) => Err(EngineError::Failed(message.clone())),
            }
        }
    }
}
