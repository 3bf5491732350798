//! Typed method parameters
//!
//! Every RPC method validates into one of these structs before any field is
//! touched. Unknown or extra fields are rejected, not silently ignored.

use gateway_core::run::{ExecutionMode, Operation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// External contract version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v1")]
    V1,
    #[serde(rename = "v2")]
    V2,
}

/// Decision recorded when an approval request resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    #[serde(rename = "allow-once")]
    AllowOnce,
    #[serde(rename = "deny")]
    Deny,
}

/// `agent.execute` — the external, versioned contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentExecuteParams {
    pub tenant_id: String,
    pub agent_scope: String,
    pub session_key: String,
    pub agent_id: String,
    pub operation: Operation,
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    pub input: Map<String, Value>,
    pub trace_id: String,
    pub protocol_version: ProtocolVersion,
    pub idempotency_key: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub deliver: Option<bool>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl AgentExecuteParams {
    /// Effective message: `input.message`, falling back to `input.prompt`,
    /// falling back (run only) to the serialized input when non-empty.
    pub fn resolve_input_message(&self) -> String {
        let direct = self
            .input
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| self.input.get("prompt").and_then(Value::as_str))
            .map(str::trim)
            .filter(|message| !message.is_empty());
        if let Some(message) = direct {
            return message.to_string();
        }
        if self.operation == Operation::Run && !self.input.is_empty() {
            return Value::Object(self.input.clone()).to_string();
        }
        String::new()
    }

    pub fn effective_mode(&self) -> ExecutionMode {
        self.mode.unwrap_or_else(|| self.operation.default_mode())
    }
}

/// Inline attachment on the legacy `agent` method.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttachmentParam {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// `agent` — the legacy/internal entry point.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentParams {
    pub message: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub deliver: Option<bool>,
    #[serde(default)]
    pub attachments: Option<Vec<AttachmentParam>>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub reply_channel: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_channel: Option<String>,
    #[serde(default)]
    pub group_space: Option<String>,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default)]
    pub extra_system_prompt: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub spawned_by: Option<String>,
}

/// `agent.confirm` — generic confirm correlated by opaque id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentConfirmParams {
    pub confirmation_id: String,
    pub approved: bool,
    pub trace_id: String,
}

/// `agent.wait`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentWaitParams {
    pub run_id: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `agent.identity.get`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentIdentityParams {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
}

/// `exec.approval.request`. Descriptive metadata is opaque to the manager
/// and passed through for display.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecApprovalRequestParams {
    #[serde(default)]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub command_argv: Option<Vec<String>>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub resolved_path: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `exec.approval.resolve`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecApprovalResolveParams {
    pub id: String,
    pub decision: ApprovalDecision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn execute_params(input: Value, operation: &str) -> AgentExecuteParams {
        serde_json::from_value(json!({
            "tenantId": "tenant-acme",
            "agentScope": "butler",
            "sessionKey": "tenant:tenant-acme:scope:butler:chat",
            "agentId": "main",
            "operation": operation,
            "input": input,
            "traceId": "trace-1",
            "protocolVersion": "v2",
            "idempotencyKey": "idem-1",
        }))
        .unwrap()
    }

    #[test]
    fn rejects_unknown_execute_fields() {
        let raw = json!({
            "tenantId": "t",
            "agentScope": "s",
            "sessionKey": "t:s:x",
            "agentId": "main",
            "operation": "run",
            "input": {},
            "traceId": "tr",
            "protocolVersion": "v1",
            "idempotencyKey": "i",
            "surprise": true,
        });
        assert!(serde_json::from_value::<AgentExecuteParams>(raw).is_err());
    }

    #[test]
    fn rejects_unknown_protocol_version() {
        let raw = json!({
            "tenantId": "t",
            "agentScope": "s",
            "sessionKey": "t:s:x",
            "agentId": "main",
            "operation": "run",
            "input": {},
            "traceId": "tr",
            "protocolVersion": "v3",
            "idempotencyKey": "i",
        });
        assert!(serde_json::from_value::<AgentExecuteParams>(raw).is_err());
    }

    #[test]
    fn message_falls_back_from_message_to_prompt() {
        let params = execute_params(json!({"prompt": "  do the thing  "}), "chat");
        assert_eq!(params.resolve_input_message(), "do the thing");

        let params = execute_params(json!({"message": "hi", "prompt": "ignored"}), "chat");
        assert_eq!(params.resolve_input_message(), "hi");
    }

    #[test]
    fn run_serializes_whole_input_when_no_message() {
        let params = execute_params(json!({"target": "inbox", "limit": 5}), "run");
        let message = params.resolve_input_message();
        let parsed: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed["target"], "inbox");

        let params = execute_params(json!({}), "run");
        assert_eq!(params.resolve_input_message(), "");
    }

    #[test]
    fn chat_with_empty_input_resolves_empty() {
        let params = execute_params(json!({"limit": 5}), "chat");
        assert_eq!(params.resolve_input_message(), "");
    }

    #[test]
    fn effective_mode_defaults_by_operation() {
        let params = execute_params(json!({"message": "x"}), "run");
        assert_eq!(params.effective_mode(), ExecutionMode::Unary);

        let params = execute_params(json!({"message": "x"}), "chat");
        assert_eq!(params.effective_mode(), ExecutionMode::Stream);
    }

    #[test]
    fn approval_request_accepts_null_resolved_path() {
        let raw = json!({
            "command": "echo hi",
            "cwd": "/tmp",
            "host": "node",
            "resolvedPath": null,
        });
        let params: ExecApprovalRequestParams = serde_json::from_value(raw).unwrap();
        assert!(params.resolved_path.is_none());

        let raw = json!({
            "command": "echo hi",
            "resolvedPath": "/usr/bin/echo",
        });
        let params: ExecApprovalRequestParams = serde_json::from_value(raw).unwrap();
        assert_eq!(params.resolved_path.as_deref(), Some("/usr/bin/echo"));
    }

    #[test]
    fn decision_wire_form_is_kebab() {
        assert_eq!(
            serde_json::to_string(&ApprovalDecision::AllowOnce).unwrap(),
            "\"allow-once\""
        );
    }
}
