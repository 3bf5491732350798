//! Run event normalizer
//!
//! Consumes the raw per-run engine event stream and produces normalized
//! external events plus terminal metrics. Per-run state is seeded on
//! `lifecycle:start` and discarded on `lifecycle:end`; concurrent runs use
//! disjoint keys so this path needs no cross-run coordination.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use gateway_core::run::{
    ChatRunRegistry, ExecutionMode, RunContextRegistry, RunEventEnvelope, RunJobRegistry,
    RunMetrics, RunStatus, RunStream, ToolEventRecipients, VerboseLevel,
};

struct RunState {
    started_at_ms: i64,
    first_token_ms: Option<i64>,
    tool_count: u32,
    mode: ExecutionMode,
}

pub struct RunEventNormalizer {
    connections: Arc<crate::gateway::ConnectionRegistry>,
    run_contexts: Arc<RunContextRegistry>,
    chat_runs: Arc<ChatRunRegistry>,
    tool_recipients: Arc<ToolEventRecipients>,
    run_jobs: Arc<RunJobRegistry>,
    runs: Mutex<HashMap<String, RunState>>,
}

impl RunEventNormalizer {
    pub fn new(
        connections: Arc<crate::gateway::ConnectionRegistry>,
        run_contexts: Arc<RunContextRegistry>,
        chat_runs: Arc<ChatRunRegistry>,
        tool_recipients: Arc<ToolEventRecipients>,
        run_jobs: Arc<RunJobRegistry>,
    ) -> Self {
        Self {
            connections,
            run_contexts,
            chat_runs,
            tool_recipients,
            run_jobs,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Drain the engine event channel until it closes.
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<RunEventEnvelope>) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(event).await;
            }
        });
    }

    pub async fn handle(&self, event: RunEventEnvelope) {
        match event.stream {
            RunStream::Lifecycle => self.handle_lifecycle(event).await,
            RunStream::Assistant => self.handle_assistant(event).await,
            RunStream::Tool => self.handle_tool(event).await,
            RunStream::Context => self.handle_context(event).await,
        }
    }

    async fn handle_lifecycle(&self, event: RunEventEnvelope) {
        match event.lifecycle_phase() {
            Some("start") => {
                let mode = event
                    .data
                    .get("mode")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_value(Value::String(raw.to_string())).ok())
                    .unwrap_or(ExecutionMode::Stream);
                self.runs.lock().await.insert(
                    event.run_id.clone(),
                    RunState {
                        started_at_ms: event.ts_ms,
                        first_token_ms: None,
                        tool_count: 0,
                        mode,
                    },
                );
                self.run_jobs.start(&event.run_id).await;
                self.connections
                    .broadcast(
                        "agent.start",
                        json!({"runId": event.run_id, "mode": mode}),
                    )
                    .await;
            }
            Some("end") => self.finish_run(event).await,
            other => debug!("ignoring lifecycle phase {:?}", other),
        }
    }

    async fn finish_run(&self, event: RunEventEnvelope) {
        let Some(state) = self.runs.lock().await.remove(&event.run_id) else {
            warn!("lifecycle end for unknown run {}", event.run_id);
            return;
        };
        let status: RunStatus = event
            .data
            .get("status")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_value(Value::String(raw.to_string())).ok())
            .unwrap_or(RunStatus::Ok);
        let metrics = RunMetrics {
            accepted_at_ms: state.started_at_ms,
            first_token_ms: state.first_token_ms,
            total_ms: event.ts_ms - state.started_at_ms,
            tool_count: Some(state.tool_count),
            execution_mode: state.mode,
        };
        let payload = json!({
            "runId": event.run_id,
            "status": status,
            "metrics": metrics,
        });
        self.connections.broadcast("agent.end", payload.clone()).await;
        if let Some(session_key) = self.session_key_for(&event.run_id).await {
            self.connections
                .send_to_session(&session_key, "agent.end", payload)
                .await;
        }

        let error = event
            .data
            .get("error")
            .and_then(Value::as_str)
            .map(String::from);
        self.run_jobs.finish(&event.run_id, status, error).await;

        // Release all per-run context now that the terminal event is out.
        self.chat_runs.remove(&event.run_id).await;
        self.tool_recipients.drop_run(&event.run_id).await;
        self.run_contexts.clear(&event.run_id).await;
    }

    async fn handle_assistant(&self, event: RunEventEnvelope) {
        let Some(text) = event.assistant_text() else {
            return;
        };
        {
            let mut runs = self.runs.lock().await;
            if let Some(state) = runs.get_mut(&event.run_id) {
                if state.first_token_ms.is_none() {
                    state.first_token_ms = Some(event.ts_ms - state.started_at_ms);
                }
            }
        }

        let event_name = if event.is_final_message() {
            "agent.message"
        } else {
            "agent.delta"
        };
        let payload = json!({
            "runId": event.run_id,
            "state": "delta",
            "message": {
                "role": "assistant",
                "content": [{"type": "text", "text": text}],
            },
            "ts": event.ts_ms,
        });
        self.connections.broadcast(event_name, payload.clone()).await;
        // Best-effort direct delivery to the run's resolved session.
        if let Some(session_key) = self.session_key_for(&event.run_id).await {
            self.connections
                .send_to_session(&session_key, event_name, payload)
                .await;
        }
    }

    async fn handle_tool(&self, event: RunEventEnvelope) {
        let verbose = match self.run_contexts.resolve(&event.run_id).await {
            Some(context) => context.verbose_level,
            None => VerboseLevel::default(),
        };
        if event.tool_phase() == Some("start") {
            let mut runs = self.runs.lock().await;
            if let Some(state) = runs.get_mut(&event.run_id) {
                state.tool_count += 1;
            }
        }

        let mut data = event.data.clone();
        if verbose.strips_output() {
            if let Some(map) = data.as_object_mut() {
                map.remove("result");
                map.remove("partialResult");
            }
        }
        let payload = json!({
            "runId": event.run_id,
            "toolCallId": event.tool_call_id(),
            "phase": event.tool_phase(),
            "data": data,
            "ts": event.ts_ms,
        });

        // Registered WS recipients always receive tool state, normalized
        // plus a legacy-shaped duplicate.
        let recipients = self.tool_recipients.get(&event.run_id).await;
        if !recipients.is_empty() {
            self.connections
                .broadcast_to(&recipients, "tool.state", payload.clone())
                .await;
            let legacy = json!({
                "runId": event.run_id,
                "stream": "tool",
                "data": payload["data"],
                "ts": event.ts_ms,
            });
            self.connections
                .broadcast_to(&recipients, "agent", legacy)
                .await;
        }

        // Session/channel subscribers only see tool state above "off".
        if verbose.forwards_to_session() {
            if let Some(session_key) = self.session_key_for(&event.run_id).await {
                self.connections
                    .send_to_session(&session_key, "tool.state", payload)
                    .await;
            }
        }
    }

    async fn handle_context(&self, event: RunEventEnvelope) {
        self.connections
            .broadcast(
                "context.patch",
                json!({"runId": event.run_id, "patch": event.data, "ts": event.ts_ms}),
            )
            .await;
    }

    async fn session_key_for(&self, run_id: &str) -> Option<String> {
        if let Some(entry) = self.chat_runs.get(run_id).await {
            return Some(entry.session_key);
        }
        self.run_contexts
            .resolve(run_id)
            .await
            .and_then(|context| context.session_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ConnectionRegistry;
    use crate::protocol::ServerFrame;
    use gateway_core::run::{ChatRunEntry, RunContext};

    struct Fixture {
        normalizer: Arc<RunEventNormalizer>,
        connections: Arc<ConnectionRegistry>,
        run_contexts: Arc<RunContextRegistry>,
        chat_runs: Arc<ChatRunRegistry>,
        tool_recipients: Arc<ToolEventRecipients>,
        run_jobs: Arc<RunJobRegistry>,
    }

    fn fixture() -> Fixture {
        let connections = Arc::new(ConnectionRegistry::new());
        let run_contexts = Arc::new(RunContextRegistry::new());
        let chat_runs = Arc::new(ChatRunRegistry::new());
        let tool_recipients = Arc::new(ToolEventRecipients::new());
        let run_jobs = Arc::new(RunJobRegistry::new());
        let normalizer = Arc::new(RunEventNormalizer::new(
            Arc::clone(&connections),
            Arc::clone(&run_contexts),
            Arc::clone(&chat_runs),
            Arc::clone(&tool_recipients),
            Arc::clone(&run_jobs),
        ));
        Fixture {
            normalizer,
            connections,
            run_contexts,
            chat_runs,
            tool_recipients,
            run_jobs,
        }
    }

    fn envelope(run_id: &str, seq: u64, stream: RunStream, ts_ms: i64, data: Value) -> RunEventEnvelope {
        RunEventEnvelope {
            run_id: run_id.to_string(),
            seq,
            stream,
            ts_ms,
            data,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Event { event, payload } = frame {
                events.push((event, payload));
            }
        }
        events
    }

    #[tokio::test]
    async fn assistant_delta_broadcasts_and_reaches_session() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;
        fx.connections.subscribe_session("conn-1", "session-1").await;
        fx.chat_runs
            .add(
                "run-1",
                ChatRunEntry {
                    session_key: "session-1".to_string(),
                    client_run_id: "client-1".to_string(),
                },
            )
            .await;

        fx.normalizer
            .handle(envelope(
                "run-1",
                1,
                RunStream::Assistant,
                1_000,
                json!({"text": "Hello world"}),
            ))
            .await;

        let events = drain(&mut rx);
        let deltas: Vec<_> = events.iter().filter(|(name, _)| name == "agent.delta").collect();
        // One broadcast plus one direct session delivery.
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].1["state"], "delta");
        assert_eq!(deltas[0].1["message"]["content"][0]["text"], "Hello world");
    }

    #[tokio::test]
    async fn final_assistant_event_emits_agent_message() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;

        fx.normalizer
            .handle(envelope(
                "run-1",
                1,
                RunStream::Assistant,
                1_000,
                json!({"text": "done", "final": true}),
            ))
            .await;

        let events = drain(&mut rx);
        assert!(events.iter().any(|(name, _)| name == "agent.message"));
    }

    #[tokio::test]
    async fn tool_events_route_to_registered_recipients_when_verbose_on() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        let (other_tx, mut other_rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;
        fx.connections.register("conn-2".to_string(), vec![], other_tx).await;
        fx.run_contexts
            .register(
                "run-tool",
                RunContext {
                    session_key: Some("session-1".to_string()),
                    verbose_level: VerboseLevel::On,
                },
            )
            .await;
        fx.tool_recipients.add("run-tool", "conn-1").await;

        fx.normalizer
            .handle(envelope(
                "run-tool",
                1,
                RunStream::Tool,
                1_000,
                json!({"phase": "start", "name": "read", "toolCallId": "t1"}),
            ))
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|(name, _)| name == "tool.state").count(), 1);
        assert_eq!(events.iter().filter(|(name, _)| name == "agent").count(), 1);
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn verbose_off_still_reaches_ws_recipients_but_not_session() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        let (sess_tx, mut sess_rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;
        fx.connections.register("sess-conn".to_string(), vec![], sess_tx).await;
        fx.connections.subscribe_session("sess-conn", "session-1").await;
        fx.run_contexts
            .register(
                "run-tool-off",
                RunContext {
                    session_key: Some("session-1".to_string()),
                    verbose_level: VerboseLevel::Off,
                },
            )
            .await;
        fx.tool_recipients.add("run-tool-off", "conn-1").await;

        fx.normalizer
            .handle(envelope(
                "run-tool-off",
                1,
                RunStream::Tool,
                1_000,
                json!({"phase": "start", "name": "read", "toolCallId": "t2"}),
            ))
            .await;

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|(name, _)| name == "tool.state").count(), 1);
        assert_eq!(events.iter().filter(|(name, _)| name == "agent").count(), 1);
        assert!(drain(&mut sess_rx).is_empty());
    }

    #[tokio::test]
    async fn verbose_on_strips_tool_output() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;
        fx.run_contexts
            .register(
                "run-tool-on",
                RunContext {
                    session_key: Some("session-1".to_string()),
                    verbose_level: VerboseLevel::On,
                },
            )
            .await;
        fx.tool_recipients.add("run-tool-on", "conn-1").await;

        fx.normalizer
            .handle(envelope(
                "run-tool-on",
                1,
                RunStream::Tool,
                1_000,
                json!({
                    "phase": "result",
                    "name": "exec",
                    "toolCallId": "t3",
                    "result": {"content": [{"type": "text", "text": "secret"}]},
                    "partialResult": {"content": [{"type": "text", "text": "partial"}]},
                }),
            ))
            .await;

        let events = drain(&mut rx);
        let (_, payload) = events.iter().find(|(name, _)| name == "tool.state").unwrap();
        assert!(payload["data"].get("result").is_none());
        assert!(payload["data"].get("partialResult").is_none());
        assert_eq!(payload["data"]["name"], "exec");
    }

    #[tokio::test]
    async fn verbose_full_preserves_tool_output() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;
        fx.run_contexts
            .register(
                "run-tool-full",
                RunContext {
                    session_key: Some("session-1".to_string()),
                    verbose_level: VerboseLevel::Full,
                },
            )
            .await;
        fx.tool_recipients.add("run-tool-full", "conn-1").await;

        let result = json!({"content": [{"type": "text", "text": "secret"}]});
        fx.normalizer
            .handle(envelope(
                "run-tool-full",
                1,
                RunStream::Tool,
                1_000,
                json!({"phase": "result", "name": "exec", "toolCallId": "t4", "result": result}),
            ))
            .await;

        let events = drain(&mut rx);
        let (_, payload) = events.iter().find(|(name, _)| name == "tool.state").unwrap();
        assert_eq!(payload["data"]["result"], result);
    }

    #[tokio::test]
    async fn lifecycle_computes_metrics_and_clears_run_state() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(32);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;
        fx.run_contexts
            .register(
                "run-lifecycle",
                RunContext {
                    session_key: Some("session-1".to_string()),
                    verbose_level: VerboseLevel::On,
                },
            )
            .await;
        fx.tool_recipients.add("run-lifecycle", "conn-1").await;

        for event in [
            envelope("run-lifecycle", 1, RunStream::Lifecycle, 1_000, json!({"phase": "start"})),
            envelope("run-lifecycle", 2, RunStream::Assistant, 1_100, json!({"text": "Hello"})),
            envelope(
                "run-lifecycle",
                3,
                RunStream::Tool,
                1_150,
                json!({"phase": "start", "name": "read", "toolCallId": "t-run"}),
            ),
            envelope("run-lifecycle", 4, RunStream::Lifecycle, 1_450, json!({"phase": "end"})),
        ] {
            fx.normalizer.handle(event).await;
        }

        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|(name, _)| name == "agent.start").count(), 1);
        let (_, end) = events.iter().find(|(name, _)| name == "agent.end").unwrap();
        assert_eq!(end["status"], "ok");
        assert_eq!(end["metrics"]["acceptedAtMs"], 1_000);
        assert_eq!(end["metrics"]["firstTokenMs"], 100);
        assert_eq!(end["metrics"]["totalMs"], 450);
        assert_eq!(end["metrics"]["toolCount"], 1);
        assert_eq!(end["metrics"]["executionMode"], "stream");

        assert!(fx.run_contexts.resolve("run-lifecycle").await.is_none());
        assert!(fx.tool_recipients.get("run-lifecycle").await.is_empty());
        assert!(fx.chat_runs.get("run-lifecycle").await.is_none());

        let job = fx.run_jobs.snapshot("run-lifecycle").await.unwrap();
        assert_eq!(job.status, RunStatus::Ok);
    }

    #[tokio::test]
    async fn run_without_assistant_events_has_null_first_token() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(16);
        fx.connections.register("conn-1".to_string(), vec![], tx).await;

        fx.normalizer
            .handle(envelope("run-quiet", 1, RunStream::Lifecycle, 2_000, json!({"phase": "start"})))
            .await;
        fx.normalizer
            .handle(envelope("run-quiet", 2, RunStream::Lifecycle, 2_500, json!({"phase": "end"})))
            .await;

        let events = drain(&mut rx);
        let (_, end) = events.iter().find(|(name, _)| name == "agent.end").unwrap();
        assert_eq!(end["metrics"]["firstTokenMs"], Value::Null);
        assert_eq!(end["metrics"]["toolCount"], 0);
    }
}
