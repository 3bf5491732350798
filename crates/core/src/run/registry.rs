//! Per-run registries
//!
//! All registries are process-wide, injectable state rebuilt empty on
//! restart. Concurrent runs use disjoint keys so there is no cross-run
//! interference.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use super::model::{RunJob, RunStatus, VerboseLevel};
use crate::now_ms;

/// Correlation context recorded when a run is accepted, consulted by the
/// event normalizer and the approval manager.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_key: Option<String>,
    pub verbose_level: VerboseLevel,
}

#[derive(Default)]
pub struct RunContextRegistry {
    contexts: RwLock<HashMap<String, RunContext>>,
}

impl RunContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, run_id: &str, context: RunContext) {
        self.contexts
            .write()
            .await
            .insert(run_id.to_string(), context);
    }

    pub async fn resolve(&self, run_id: &str) -> Option<RunContext> {
        self.contexts.read().await.get(run_id).cloned()
    }

    pub async fn clear(&self, run_id: &str) {
        self.contexts.write().await.remove(run_id);
    }
}

/// Session/client correlation of a chat-mode run.
#[derive(Debug, Clone)]
pub struct ChatRunEntry {
    pub session_key: String,
    pub client_run_id: String,
}

#[derive(Default)]
pub struct ChatRunRegistry {
    runs: RwLock<HashMap<String, ChatRunEntry>>,
}

impl ChatRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, run_id: &str, entry: ChatRunEntry) {
        self.runs.write().await.insert(run_id.to_string(), entry);
    }

    pub async fn get(&self, run_id: &str) -> Option<ChatRunEntry> {
        self.runs.read().await.get(run_id).cloned()
    }

    pub async fn remove(&self, run_id: &str) {
        self.runs.write().await.remove(run_id);
    }

    /// Run ids currently registered for the given session.
    pub async fn run_ids_for_session(&self, session_key: &str) -> Vec<String> {
        self.runs
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.session_key == session_key)
            .map(|(run_id, _)| run_id.clone())
            .collect()
    }
}

/// Additive multimap `run_id -> set(connection id)` of connections that
/// should receive verbose tool events. Entries are dropped wholesale when
/// the run ends.
#[derive(Default)]
pub struct ToolEventRecipients {
    recipients: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ToolEventRecipients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, run_id: &str, conn_id: &str) {
        self.recipients
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub async fn get(&self, run_id: &str) -> Vec<String> {
        self.recipients
            .read()
            .await
            .get(run_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn drop_run(&self, run_id: &str) {
        self.recipients.write().await.remove(run_id);
    }
}

/// Run lifecycle snapshots, with notification for `agent.wait` callers.
#[derive(Default)]
pub struct RunJobRegistry {
    jobs: RwLock<HashMap<String, RunJob>>,
    changed: Notify,
}

impl RunJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self, run_id: &str) {
        let job = RunJob {
            run_id: run_id.to_string(),
            status: RunStatus::Running,
            started_at_ms: now_ms(),
            ended_at_ms: None,
            error: None,
        };
        self.jobs.write().await.insert(run_id.to_string(), job);
        tracing::debug!("run {} started", run_id);
        self.changed.notify_waiters();
    }

    pub async fn finish(&self, run_id: &str, status: RunStatus, error: Option<String>) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(run_id) {
            job.status = status;
            job.ended_at_ms = Some(now_ms());
            job.error = error;
            tracing::debug!("run {} finished status={:?}", run_id, status);
        }
        drop(jobs);
        self.changed.notify_waiters();
    }

    pub async fn snapshot(&self, run_id: &str) -> Option<RunJob> {
        self.jobs.read().await.get(run_id).cloned()
    }

    /// Wait until the run reaches a terminal status, up to `timeout`.
    /// Returns `None` when the deadline passes first.
    pub async fn wait_terminal(&self, run_id: &str, timeout: Duration) -> Option<RunJob> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            if let Some(job) = self.snapshot(run_id).await {
                if job.status.is_terminal() {
                    return Some(job);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

/// Shared handles, cloned into handlers and background tasks.
pub type SharedRunContexts = Arc<RunContextRegistry>;
pub type SharedChatRuns = Arc<ChatRunRegistry>;
pub type SharedToolRecipients = Arc<ToolEventRecipients>;
pub type SharedRunJobs = Arc<RunJobRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_context_register_resolve_clear() {
        let registry = RunContextRegistry::new();
        registry
            .register(
                "run-1",
                RunContext {
                    session_key: Some("agent:main:main".to_string()),
                    verbose_level: VerboseLevel::Full,
                },
            )
            .await;

        let context = registry.resolve("run-1").await.unwrap();
        assert_eq!(context.session_key.as_deref(), Some("agent:main:main"));
        assert_eq!(context.verbose_level, VerboseLevel::Full);

        registry.clear("run-1").await;
        assert!(registry.resolve("run-1").await.is_none());
    }

    #[tokio::test]
    async fn chat_runs_index_by_session() {
        let registry = ChatRunRegistry::new();
        registry
            .add(
                "run-1",
                ChatRunEntry {
                    session_key: "s-1".to_string(),
                    client_run_id: "run-1".to_string(),
                },
            )
            .await;
        registry
            .add(
                "run-2",
                ChatRunEntry {
                    session_key: "s-2".to_string(),
                    client_run_id: "run-2".to_string(),
                },
            )
            .await;

        let ids = registry.run_ids_for_session("s-1").await;
        assert_eq!(ids, vec!["run-1".to_string()]);
    }

    #[tokio::test]
    async fn tool_recipients_accumulate_and_drop() {
        let recipients = ToolEventRecipients::new();
        recipients.add("run-1", "conn-b").await;
        recipients.add("run-1", "conn-a").await;
        recipients.add("run-1", "conn-a").await;

        assert_eq!(recipients.get("run-1").await, vec!["conn-a", "conn-b"]);

        recipients.drop_run("run-1").await;
        assert!(recipients.get("run-1").await.is_empty());
    }

    #[tokio::test]
    async fn wait_terminal_observes_finish() {
        let registry = Arc::new(RunJobRegistry::new());
        registry.start("run-1").await;

        let waiter = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            waiter
                .wait_terminal("run-1", Duration::from_secs(5))
                .await
        });

        tokio::task::yield_now().await;
        registry.finish("run-1", RunStatus::Ok, None).await;

        let job = handle.await.unwrap().unwrap();
        assert_eq!(job.status, RunStatus::Ok);
        assert!(job.ended_at_ms.is_some());
    }

    #[tokio::test]
    async fn wait_terminal_times_out_for_running_job() {
        let registry = RunJobRegistry::new();
        registry.start("run-1").await;

        let result = registry
            .wait_terminal("run-1", Duration::from_millis(20))
            .await;
        assert!(result.is_none());
    }
}
