//! Application state

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;

use gateway_core::dedupe::IdempotencyCache;
use gateway_core::run::{
    ChatRunRegistry, RunContextRegistry, RunEventEnvelope, RunJobRegistry, ToolEventRecipients,
};
use gateway_core::session::{MemorySessionStore, SessionStore};

use crate::approval::{ExecApprovalManager, TimeoutPolicy, DEFAULT_APPROVAL_TIMEOUT_MS};
use crate::engine::ExecutionEngine;
use crate::events::RunEventNormalizer;
use crate::gateway::ConnectionRegistry;
use crate::protocol::ApprovalDecision;

/// Skills replay entries are kept for ten minutes.
pub const SKILLS_REPLAY_TTL_MS: i64 = 10 * 60 * 1000;

#[derive(Clone)]
pub struct GatewayConfig {
    /// Empty token disables auth (local development).
    pub auth_token: String,
    /// Agent ids this gateway will accept runs for.
    pub known_agents: HashSet<String>,
    pub approval_timeout_ms: u64,
    pub approval_timeout_policy: TimeoutPolicy,
    pub bind_addr: String,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let auth_token = std::env::var("GATEWAY_TOKEN").unwrap_or_default();
        let known_agents = std::env::var("GATEWAY_AGENTS")
            .unwrap_or_else(|_| "main".to_string())
            .split(',')
            .map(|raw| raw.trim().to_lowercase())
            .filter(|id| !id.is_empty())
            .collect();
        let approval_timeout_ms = std::env::var("GATEWAY_APPROVAL_TIMEOUT_MS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_MS);
        let approval_timeout_policy = match std::env::var("GATEWAY_APPROVAL_TIMEOUT_DECISION")
            .as_deref()
        {
            Ok("allow-once") => TimeoutPolicy {
                decision: ApprovalDecision::AllowOnce,
            },
            _ => TimeoutPolicy::default(),
        };
        let bind_addr =
            std::env::var("GATEWAY_BIND").unwrap_or_else(|_| "127.0.0.1:18789".to_string());
        Self {
            auth_token,
            known_agents,
            approval_timeout_ms,
            approval_timeout_policy,
            bind_addr,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct GatewayState {
    inner: Arc<GatewayStateInner>,
}

struct GatewayStateInner {
    config: GatewayConfig,
    connections: Arc<ConnectionRegistry>,
    approvals: Arc<ExecApprovalManager>,
    run_contexts: Arc<RunContextRegistry>,
    chat_runs: Arc<ChatRunRegistry>,
    tool_recipients: Arc<ToolEventRecipients>,
    run_jobs: Arc<RunJobRegistry>,
    sessions: Arc<dyn SessionStore>,
    engine: Arc<dyn ExecutionEngine>,
    run_cache: IdempotencyCache,
    skills_cache: IdempotencyCache,
    events_tx: mpsc::Sender<RunEventEnvelope>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, engine: Arc<dyn ExecutionEngine>) -> Self {
        Self::with_sessions(config, engine, Arc::new(MemorySessionStore::new()))
    }

    pub fn with_sessions(
        config: GatewayConfig,
        engine: Arc<dyn ExecutionEngine>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let run_contexts = Arc::new(RunContextRegistry::new());
        let chat_runs = Arc::new(ChatRunRegistry::new());
        let tool_recipients = Arc::new(ToolEventRecipients::new());
        let run_jobs = Arc::new(RunJobRegistry::new());
        let approvals = Arc::new(ExecApprovalManager::new(
            Arc::clone(&connections),
            config.approval_timeout_ms,
            config.approval_timeout_policy,
        ));

        let (events_tx, events_rx) = mpsc::channel(256);
        let normalizer = Arc::new(RunEventNormalizer::new(
            Arc::clone(&connections),
            Arc::clone(&run_contexts),
            Arc::clone(&chat_runs),
            Arc::clone(&tool_recipients),
            Arc::clone(&run_jobs),
        ));
        normalizer.spawn(events_rx);

        Self {
            inner: Arc::new(GatewayStateInner {
                config,
                connections,
                approvals,
                run_contexts,
                chat_runs,
                tool_recipients,
                run_jobs,
                sessions,
                engine,
                run_cache: IdempotencyCache::new(),
                skills_cache: IdempotencyCache::new(),
                events_tx,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.connections
    }

    pub fn approvals(&self) -> &Arc<ExecApprovalManager> {
        &self.inner.approvals
    }

    pub fn run_contexts(&self) -> &Arc<RunContextRegistry> {
        &self.inner.run_contexts
    }

    pub fn chat_runs(&self) -> &Arc<ChatRunRegistry> {
        &self.inner.chat_runs
    }

    pub fn tool_recipients(&self) -> &Arc<ToolEventRecipients> {
        &self.inner.tool_recipients
    }

    pub fn run_jobs(&self) -> &Arc<RunJobRegistry> {
        &self.inner.run_jobs
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.inner.sessions
    }

    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.inner.engine
    }

    pub fn run_cache(&self) -> &IdempotencyCache {
        &self.inner.run_cache
    }

    pub fn skills_cache(&self) -> &IdempotencyCache {
        &self.inner.skills_cache
    }

    pub fn events_tx(&self) -> mpsc::Sender<RunEventEnvelope> {
        self.inner.events_tx.clone()
    }

    pub fn is_known_agent(&self, agent_id: &str) -> bool {
        self.inner.config.known_agents.contains(agent_id)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::engine::stub::StubEngine;

    pub fn test_config() -> GatewayConfig {
        GatewayConfig {
            auth_token: String::new(),
            known_agents: ["main".to_string(), "research".to_string()].into(),
            approval_timeout_ms: DEFAULT_APPROVAL_TIMEOUT_MS,
            approval_timeout_policy: TimeoutPolicy::default(),
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }

    pub fn state_with_engine(engine: Arc<StubEngine>) -> GatewayState {
        GatewayState::new(test_config(), engine)
    }
}
