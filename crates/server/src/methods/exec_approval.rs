//! Exec approval RPC adapters
//!
//! Thin wrappers over the approval manager: parse params, call the
//! manager, shape the response.

use serde_json::{json, Value};

use crate::approval::{approval_info, ResolutionSource};
use crate::protocol::{
    AgentConfirmParams, ErrorShape, ExecApprovalRequestParams, ExecApprovalResolveParams, Responder,
};
use crate::state::GatewayState;

/// `exec.approval.request` blocks until resolution or timeout, then
/// answers with the decision.
pub async fn handle_request(state: &GatewayState, responder: &Responder, params: Value) {
    let params: ExecApprovalRequestParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::invalid_request(format!("invalid params: {err}")))
                .await;
            return;
        }
    };
    let info = approval_info(
        params.id,
        params.command,
        params.command_argv,
        params.cwd,
        params.host,
        params.resolved_path,
        params.node_id,
        params.timeout_ms,
    );
    match state.approvals().request(info).await {
        Ok(resolution) => {
            responder
                .ok(json!({
                    "id": resolution.id,
                    "decision": resolution.decision,
                    "source": resolution.source,
                }))
                .await;
        }
        Err(err) => responder.error(err).await,
    }
}

pub async fn handle_resolve(state: &GatewayState, responder: &Responder, params: Value) {
    let params: ExecApprovalResolveParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::invalid_request(format!("invalid params: {err}")))
                .await;
            return;
        }
    };
    match state
        .approvals()
        .resolve(&params.id, params.decision, None, ResolutionSource::Resolve)
        .await
    {
        Ok(()) => responder.ok(json!({"ok": true, "id": params.id})).await,
        Err(err) => responder.error(err).await,
    }
}

/// `agent.confirm`: external alias resolving by confirmation id.
pub async fn handle_confirm(state: &GatewayState, responder: &Responder, params: Value) {
    let params: AgentConfirmParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::external_invalid(format!("invalid params: {err}")))
                .await;
            return;
        }
    };
    match state
        .approvals()
        .confirm_by_id(&params.confirmation_id, params.approved, &params.trace_id)
        .await
    {
        Ok(echo) => responder.ok(echo).await,
        Err(err) => responder.error(err).await,
    }
}
