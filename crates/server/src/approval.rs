//! Exec approval manager
//!
//! Owns the lifecycle of pending approval requests. A running task blocks on
//! `request` until a decision arrives over the approval channel
//! (`exec.approval.resolve`), over the generic confirm channel
//! (`agent.confirm`), or from the per-request timeout. Whichever happens
//! first wins; everything else fails with unknown id.
//!
//! Ordering contract: the pending entry is registered in the table before
//! the "requested" broadcast goes out, so a resolver reacting to that
//! broadcast always finds a registered entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::ConnectionRegistry;
use crate::protocol::{ApprovalDecision, ErrorShape};

pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 60_000;

/// Channel that produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionSource {
    #[serde(rename = "resolve")]
    Resolve,
    #[serde(rename = "agent.confirm")]
    AgentConfirm,
    #[serde(rename = "timeout")]
    Timeout,
}

/// Descriptive metadata of a pending request, passed through for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequestInfo {
    pub id: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_argv: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub created_at_ms: i64,
    pub timeout_ms: u64,
}

/// Terminal outcome of one approval request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResolution {
    pub id: String,
    pub decision: ApprovalDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    pub source: ResolutionSource,
}

struct PendingApproval {
    tx: oneshot::Sender<ApprovalResolution>,
}

/// Decision synthesized when a request times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub decision: ApprovalDecision,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            decision: ApprovalDecision::Deny,
        }
    }
}

pub struct ExecApprovalManager {
    pending: Mutex<HashMap<String, PendingApproval>>,
    connections: Arc<ConnectionRegistry>,
    default_timeout_ms: u64,
    timeout_policy: TimeoutPolicy,
}

impl ExecApprovalManager {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        default_timeout_ms: u64,
        timeout_policy: TimeoutPolicy,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            connections,
            default_timeout_ms,
            timeout_policy,
        }
    }

    /// Register a pending approval and wait for its resolution.
    ///
    /// Rejects synchronously when `info.id` is already pending, with no
    /// broadcast performed.
    pub async fn request(
        &self,
        mut info: ApprovalRequestInfo,
    ) -> Result<ApprovalResolution, ErrorShape> {
        if info.id.is_empty() {
            info.id = format!("approval_{}", Uuid::new_v4().simple());
        }
        if info.timeout_ms == 0 {
            info.timeout_ms = self.default_timeout_ms;
        }
        let id = info.id.clone();
        let timeout = Duration::from_millis(info.timeout_ms);

        let (tx, mut rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&id) {
                return Err(ErrorShape::invalid_request("approval id already pending"));
            }
            pending.insert(id.clone(), PendingApproval { tx });
        }

        // Entry is registered; announcing is now safe even if a resolver
        // reacts before this broadcast returns.
        self.connections
            .broadcast(
                "exec.approval.requested",
                serde_json::to_value(&info).unwrap_or_default(),
            )
            .await;
        self.connections
            .broadcast(
                "tool.state",
                json!({
                    "state": "awaiting_input",
                    "confirmationId": id,
                    "command": info.command,
                }),
            )
            .await;

        match tokio::time::timeout(timeout, &mut rx).await {
            // Sender dropped without a value only on shutdown paths.
            Ok(resolution) => {
                resolution.map_err(|_| ErrorShape::unavailable("approval channel closed"))
            }
            Err(_) => self.finish_timed_out(&id, rx).await,
        }
    }

    async fn finish_timed_out(
        &self,
        id: &str,
        mut rx: oneshot::Receiver<ApprovalResolution>,
    ) -> Result<ApprovalResolution, ErrorShape> {
        let removed = self.pending.lock().await.remove(id);
        // A resolver may win the race with the timer. Its decision is
        // already on the oneshot and was broadcast as the resolution, so it
        // is what the requester must observe, not a synthesized timeout.
        if let Ok(resolution) = rx.try_recv() {
            warn!("approval {} resolved concurrently with timeout", id);
            return Ok(resolution);
        }
        let resolution = ApprovalResolution {
            id: id.to_string(),
            decision: self.timeout_policy.decision,
            resolved_by: None,
            source: ResolutionSource::Timeout,
        };
        if removed.is_some() {
            info!("approval {} timed out", id);
            self.connections
                .broadcast(
                    "exec.approval.resolved",
                    serde_json::to_value(&resolution).unwrap_or_default(),
                )
                .await;
        }
        Ok(resolution)
    }

    /// Resolve a pending request. First resolution wins; an unknown or
    /// already-finalized id is a caller error with no side effects.
    pub async fn resolve(
        &self,
        id: &str,
        decision: ApprovalDecision,
        resolved_by: Option<String>,
        source: ResolutionSource,
    ) -> Result<(), ErrorShape> {
        let removed = self.pending.lock().await.remove(id);
        let Some(entry) = removed else {
            return Err(ErrorShape::invalid_request("unknown approval id"));
        };

        let resolution = ApprovalResolution {
            id: id.to_string(),
            decision,
            resolved_by,
            source,
        };
        info!("approval {} resolved decision={:?} source={:?}", id, decision, source);
        // The requester may have timed out in the same instant; dropping the
        // value is harmless then.
        let _ = entry.tx.send(resolution.clone());
        self.connections
            .broadcast(
                "exec.approval.resolved",
                serde_json::to_value(&resolution).unwrap_or_default(),
            )
            .await;
        Ok(())
    }

    /// `agent.confirm` alias: maps `approved` to a decision, tags the
    /// source, and echoes the confirmation on success.
    pub async fn confirm_by_id(
        &self,
        confirmation_id: &str,
        approved: bool,
        trace_id: &str,
    ) -> Result<Value, ErrorShape> {
        let decision = if approved {
            ApprovalDecision::AllowOnce
        } else {
            ApprovalDecision::Deny
        };
        self.resolve(
            confirmation_id,
            decision,
            None,
            ResolutionSource::AgentConfirm,
        )
        .await
        .map_err(|_| ErrorShape::external_invalid("unknown confirmationId"))?;
        Ok(json!({
            "ok": true,
            "confirmationId": confirmation_id,
            "approved": approved,
            "traceId": trace_id,
        }))
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Request info constructor used by the RPC handler.
pub fn approval_info(
    id: Option<String>,
    command: String,
    command_argv: Option<Vec<String>>,
    cwd: Option<String>,
    host: Option<String>,
    resolved_path: Option<String>,
    node_id: Option<String>,
    timeout_ms: Option<u64>,
) -> ApprovalRequestInfo {
    ApprovalRequestInfo {
        id: id.map(|v| v.trim().to_string()).unwrap_or_default(),
        command,
        command_argv,
        cwd,
        host,
        resolved_path,
        node_id,
        created_at_ms: gateway_core::now_ms(),
        timeout_ms: timeout_ms.unwrap_or(0),
    }
}
