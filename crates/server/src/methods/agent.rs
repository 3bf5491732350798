//! Agent run methods
//!
//! `agent.execute` is the external entry point (strict params, external
//! error codes); `agent` is the internal/legacy surface that the stream
//! path of `agent.execute` also lands on. Both share one idempotency
//! cache keyed `agent:<idempotencyKey>`.

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use gateway_core::dedupe::DedupeEntry;
use gateway_core::run::{
    ChatRunEntry, ExecutionMode, Operation, RunContext, RunStatus, VerboseLevel,
};
use gateway_core::session::{
    agent_id_from_session_key, agent_main_session_key, is_within_tenant_scope, normalize_agent_id,
    SendPolicy, SessionEntry,
};

use crate::engine::{EngineError, EngineRequest};
use crate::gateway::CAP_TOOL_EVENTS;
use crate::protocol::{
    AgentExecuteParams, AgentIdentityParams, AgentParams, AgentWaitParams, ErrorCode, ErrorShape,
    Responder,
};
use crate::state::GatewayState;

pub const INTERNAL_MESSAGE_CHANNEL: &str = "internal";
pub const KNOWN_CHANNELS: [&str; 6] = [
    "webchat",
    "discord",
    "telegram",
    "slack",
    "signal",
    INTERNAL_MESSAGE_CHANNEL,
];
pub const GLOBAL_SESSION_KEY: &str = "global";

const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

fn dedupe_key(idempotency_key: &str) -> String {
    format!("agent:{idempotency_key}")
}

fn accepted_payload(run_id: &str, accepted_at_ms: i64) -> Value {
    json!({
        "runId": run_id,
        "status": "accepted",
        "acceptedAtMs": accepted_at_ms,
    })
}

fn assistant_message(text: &str) -> Value {
    json!({
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
    })
}

/// Terminal unary payloads echo the request identity so callers can
/// correlate without holding their own request state.
fn unary_envelope(
    params: &AgentExecuteParams,
    responder: &Responder,
    run_id: &str,
    status: &str,
) -> Value {
    json!({
        "runId": run_id,
        "status": status,
        "mode": ExecutionMode::Unary,
        "operation": params.operation,
        "tenantId": params.tenant_id,
        "agentScope": params.agent_scope,
        "sessionKey": params.session_key,
        "traceId": params.trace_id,
        "requestId": responder.request_id(),
        "protocolVersion": params.protocol_version,
    })
}

/// Replay a cached terminal or in-flight outcome with `cached: true` meta.
async fn replay(responder: &Responder, entry: DedupeEntry) {
    let error = entry
        .error
        .and_then(|raw| serde_json::from_value::<ErrorShape>(raw).ok());
    let payload = if entry.payload.is_null() {
        None
    } else {
        Some(entry.payload)
    };
    responder
        .respond(entry.ok, payload, error, Some(json!({"cached": true})))
        .await;
}

pub async fn handle_agent_execute(
    state: &GatewayState,
    responder: &Responder,
    conn_id: &str,
    params: Value,
) {
    // Version gate runs before strict parsing so an unknown version maps to
    // its own error code instead of a generic parse failure.
    match params.get("protocolVersion").and_then(Value::as_str) {
        Some("v1") | Some("v2") => {}
        Some(other) => {
            responder
                .error(
                    ErrorShape::new(
                        ErrorCode::ExternalProtocolVersionUnsupported,
                        format!("unsupported protocolVersion: {other}"),
                    )
                    .retryable(false),
                )
                .await;
            return;
        }
        None => {
            responder
                .error(ErrorShape::external_invalid("protocolVersion is required"))
                .await;
            return;
        }
    }

    let params: AgentExecuteParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::external_invalid(format!("invalid params: {err}")))
                .await;
            return;
        }
    };

    // Scope check happens before any cache or registry mutation.
    if !is_within_tenant_scope(&params.tenant_id, &params.agent_scope, &params.session_key) {
        responder
            .error(
                ErrorShape::new(
                    ErrorCode::ExternalTenantScopeMismatch,
                    "sessionKey is outside the caller's tenant scope",
                )
                .retryable(false)
                .details(json!({
                    "traceId": params.trace_id,
                    "requestId": responder.request_id(),
                })),
            )
            .await;
        return;
    }
    if params.trace_id.trim().is_empty() {
        responder
            .error(ErrorShape::external_invalid("traceId is required"))
            .await;
        return;
    }
    if params.idempotency_key.trim().is_empty() {
        responder
            .error(ErrorShape::external_invalid("idempotencyKey is required"))
            .await;
        return;
    }
    let message = params.resolve_input_message();
    if message.is_empty() {
        responder
            .error(ErrorShape::external_invalid(
                "input.message or input.prompt is required",
            ))
            .await;
        return;
    }
    let agent_id = normalize_agent_id(&params.agent_id);

    match params.effective_mode() {
        ExecutionMode::Unary => execute_unary(state, responder, &params, &agent_id, message).await,
        ExecutionMode::Stream => {
            let lane = match params.operation {
                Operation::Chat => "external-chat",
                Operation::Run => "external-run",
            };
            let legacy = AgentParams {
                message,
                idempotency_key: params.idempotency_key.clone(),
                agent_id: Some(agent_id),
                to: params.to.clone(),
                reply_to: None,
                session_id: None,
                session_key: Some(params.session_key.clone()),
                thinking: params.thinking.clone(),
                deliver: params.deliver,
                attachments: None,
                channel: params.channel.clone(),
                reply_channel: None,
                group_id: None,
                group_channel: None,
                group_space: None,
                lane: Some(lane.to_string()),
                extra_system_prompt: None,
                timeout: params.timeout,
                label: None,
                spawned_by: None,
            };
            run_agent(state, responder, conn_id, legacy).await;
        }
    }
}

async fn execute_unary(
    state: &GatewayState,
    responder: &Responder,
    params: &AgentExecuteParams,
    agent_id: &str,
    message: String,
) {
    let key = dedupe_key(&params.idempotency_key);
    if let Some(entry) = state.run_cache().get(&key).await {
        info!("replaying cached outcome for {}", key);
        replay(responder, entry).await;
        return;
    }
    if !state.is_known_agent(agent_id) {
        responder
            .error(ErrorShape::external_invalid(format!(
                "unknown agentId: {agent_id}"
            )))
            .await;
        return;
    }

    // Externally-visible runs are addressed by their idempotency key.
    let run_id = params.idempotency_key.trim().to_string();
    let accepted_at_ms = gateway_core::now_ms();
    state
        .run_cache()
        .set(&key, DedupeEntry::ok(accepted_at_ms, accepted_payload(&run_id, accepted_at_ms)))
        .await;
    state
        .run_contexts()
        .register(
            &run_id,
            RunContext {
                session_key: Some(params.session_key.clone()),
                verbose_level: VerboseLevel::default(),
            },
        )
        .await;
    state.run_jobs().start(&run_id).await;

    // Unary runs are serviced synchronously; engine events are not
    // forwarded to the normalizer.
    let (events_tx, mut events_rx) = mpsc::channel(64);
    tokio::spawn(async move { while events_rx.recv().await.is_some() {} });

    let request = EngineRequest {
        run_id: run_id.clone(),
        session_key: params.session_key.clone(),
        agent_id: agent_id.to_string(),
        message,
        images: Vec::new(),
        thinking: params.thinking.clone(),
        timeout_ms: params.timeout,
        lane: Some(
            match params.operation {
                Operation::Chat => "external-chat",
                Operation::Run => "external-run",
            }
            .to_string(),
        ),
        extra_system_prompt: None,
        mode: ExecutionMode::Unary,
        events: events_tx,
    };
    let outcome = state.engine().execute(request).await;
    let total_ms = gateway_core::now_ms() - accepted_at_ms;
    state.run_contexts().clear(&run_id).await;

    match outcome {
        Ok(result) => {
            let mut payload = unary_envelope(params, responder, &run_id, "ok");
            payload["metrics"] = json!({
                "acceptedAtMs": accepted_at_ms,
                "firstTokenMs": Value::Null,
                "totalMs": total_ms,
                "toolCount": Value::Null,
                "executionMode": "unary",
            });
            payload["result"] = assistant_message(&result.text);
            state
                .run_cache()
                .set(&key, DedupeEntry::ok(gateway_core::now_ms(), payload.clone()))
                .await;
            state.run_jobs().finish(&run_id, RunStatus::Ok, None).await;
            responder.ok(payload).await;
        }
        Err(err) => {
            warn!("unary run {} failed: {}", run_id, err);
            let code = match &err {
                EngineError::Timeout(_) => ErrorCode::ExternalUpstreamTimeout,
                EngineError::Failed(_) => ErrorCode::ExternalInternalError,
            };
            let shape = ErrorShape::new(code, err.to_string()).retryable(true);
            let payload = unary_envelope(params, responder, &run_id, "error");
            let error_value =
                serde_json::to_value(&shape).unwrap_or_else(|_| json!({"message": "error"}));
            state
                .run_cache()
                .set(
                    &key,
                    DedupeEntry::err(gateway_core::now_ms(), payload, error_value),
                )
                .await;
            state
                .run_jobs()
                .finish(&run_id, RunStatus::Error, Some(err.to_string()))
                .await;
            responder.error(shape).await;
        }
    }
}

pub async fn handle_agent(
    state: &GatewayState,
    responder: &Responder,
    conn_id: &str,
    params: Value,
) {
    let params: AgentParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::invalid_request(format!("invalid params: {err}")))
                .await;
            return;
        }
    };
    run_agent(state, responder, conn_id, params).await;
}

async fn run_agent(state: &GatewayState, responder: &Responder, conn_id: &str, params: AgentParams) {
    let message = params.message.trim().to_string();
    if message.is_empty() {
        responder
            .error(ErrorShape::invalid_request("message is required"))
            .await;
        return;
    }
    if params.idempotency_key.trim().is_empty() {
        responder
            .error(ErrorShape::invalid_request("idempotencyKey is required"))
            .await;
        return;
    }
    for channel in [params.channel.as_deref(), params.reply_channel.as_deref()]
        .into_iter()
        .flatten()
    {
        if !KNOWN_CHANNELS.contains(&channel) {
            responder
                .error(ErrorShape::invalid_request(format!(
                    "unknown channel: {channel}"
                )))
                .await;
            return;
        }
    }

    let explicit_agent = params
        .agent_id
        .as_deref()
        .map(normalize_agent_id)
        .filter(|id| !id.is_empty());
    let agent_id = match (&explicit_agent, &params.session_key) {
        (Some(explicit), Some(session_key)) => {
            let embedded = agent_id_from_session_key(session_key);
            if embedded != *explicit {
                responder
                    .error(ErrorShape::invalid_request(format!(
                        "agentId {explicit} does not match sessionKey agent {embedded}"
                    )))
                    .await;
                return;
            }
            explicit.clone()
        }
        (Some(explicit), None) => explicit.clone(),
        (None, Some(session_key)) => agent_id_from_session_key(session_key),
        (None, None) => "main".to_string(),
    };
    if !state.is_known_agent(&agent_id) {
        responder
            .error(ErrorShape::invalid_request(format!(
                "unknown agentId: {agent_id}"
            )))
            .await;
        return;
    }
    let session_key = params
        .session_key
        .clone()
        .unwrap_or_else(|| agent_main_session_key(&agent_id));

    let key = dedupe_key(&params.idempotency_key);
    if let Some(entry) = state.run_cache().get(&key).await {
        info!("replaying cached outcome for {}", key);
        replay(responder, entry).await;
        return;
    }

    let images = match decode_attachments(&params) {
        Ok(images) => images,
        Err(err) => {
            responder.error(err).await;
            return;
        }
    };

    // Session bookkeeping: group inheritance, delivery policy, metadata.
    let mut entry = match state.sessions().load(&session_key).await {
        Ok(entry) => entry.unwrap_or_default(),
        Err(err) => {
            responder
                .error(ErrorShape::unavailable(format!("session load failed: {err}")))
                .await;
            return;
        }
    };
    if matches!(entry.send_policy, Some(SendPolicy::Deny)) && params.deliver == Some(true) {
        responder
            .error(ErrorShape::invalid_request(
                "delivery is disabled for this session",
            ))
            .await;
        return;
    }
    if entry.session_id.is_empty() {
        entry.session_id = Uuid::new_v4().to_string();
    }
    if let Some(parent_key) = &params.spawned_by {
        if let Ok(Some(parent)) = state.sessions().load(parent_key).await {
            entry.inherit_group_from(&parent);
        }
        entry.spawned_by = Some(parent_key.clone());
    }
    apply_session_overrides(&mut entry, &params);
    entry.updated_at_ms = gateway_core::now_ms();
    let verbose_level = entry.verbose_level.unwrap_or_default();
    if let Err(err) = state.sessions().update(&session_key, entry).await {
        responder
            .error(ErrorShape::unavailable(format!("session update failed: {err}")))
            .await;
        return;
    }

    // The run is addressed by its idempotency key so retries, `agent.wait`
    // and cached replays all land on the same id.
    let run_id = params.idempotency_key.trim().to_string();
    let accepted_at_ms = gateway_core::now_ms();
    // Placeholder goes in before the engine is spawned so a racing retry
    // replays "accepted" instead of starting a second run.
    state
        .run_cache()
        .set(&key, DedupeEntry::ok(accepted_at_ms, accepted_payload(&run_id, accepted_at_ms)))
        .await;
    state
        .run_contexts()
        .register(
            &run_id,
            RunContext {
                session_key: Some(session_key.clone()),
                verbose_level,
            },
        )
        .await;
    if session_key == GLOBAL_SESSION_KEY || session_key == agent_main_session_key(&agent_id) {
        state
            .chat_runs()
            .add(
                &run_id,
                ChatRunEntry {
                    session_key: session_key.clone(),
                    client_run_id: responder.request_id().to_string(),
                },
            )
            .await;
    }
    if state.connections().has_cap(conn_id, CAP_TOOL_EVENTS).await {
        state.tool_recipients().add(&run_id, conn_id).await;
        // Tool events from sibling runs of the same session also go to
        // this connection.
        for sibling in state.chat_runs().run_ids_for_session(&session_key).await {
            state.tool_recipients().add(&sibling, conn_id).await;
        }
    }
    state.run_jobs().start(&run_id).await;

    responder.ok(accepted_payload(&run_id, accepted_at_ms)).await;

    let request = EngineRequest {
        run_id: run_id.clone(),
        session_key: session_key.clone(),
        agent_id,
        message: with_timestamp(&message),
        images,
        thinking: params.thinking.clone(),
        timeout_ms: params.timeout,
        lane: params.lane.clone(),
        extra_system_prompt: params.extra_system_prompt.clone(),
        mode: ExecutionMode::Stream,
        events: state.events_tx(),
    };

    let state = state.clone();
    let responder = responder.clone();
    tokio::spawn(async move {
        let outcome = state.engine().execute(request).await;
        match outcome {
            Ok(result) => {
                let payload = json!({
                    "runId": run_id,
                    "status": "ok",
                    "message": assistant_message(&result.text),
                });
                state
                    .run_cache()
                    .set(&key, DedupeEntry::ok(gateway_core::now_ms(), payload.clone()))
                    .await;
                state.run_jobs().finish(&run_id, RunStatus::Ok, None).await;
                responder.ok(payload).await;
            }
            Err(err) => {
                warn!("run {} failed: {}", run_id, err);
                let (code, status) = match &err {
                    EngineError::Timeout(_) => (ErrorCode::AgentTimeout, RunStatus::Timeout),
                    EngineError::Failed(_) => (ErrorCode::Unavailable, RunStatus::Error),
                };
                let shape = ErrorShape::new(code, err.to_string()).retryable(true);
                let payload = json!({"runId": run_id, "status": status});
                let error_value = serde_json::to_value(&shape)
                    .unwrap_or_else(|_| json!({"message": "error"}));
                state
                    .run_cache()
                    .set(
                        &key,
                        DedupeEntry::err(gateway_core::now_ms(), payload, error_value),
                    )
                    .await;
                state
                    .run_jobs()
                    .finish(&run_id, status, Some(err.to_string()))
                    .await;
                state.run_contexts().clear(&run_id).await;
                state.chat_runs().remove(&run_id).await;
                state.tool_recipients().drop_run(&run_id).await;
                responder.error(shape).await;
            }
        }
    });
}

fn apply_session_overrides(entry: &mut SessionEntry, params: &AgentParams) {
    if let Some(label) = &params.label {
        entry.label = Some(label.clone());
    }
    if let Some(channel) = &params.channel {
        entry.channel = Some(channel.clone());
    }
    if let Some(to) = &params.to {
        entry.last_to = Some(to.clone());
    }
    if let Some(thinking) = &params.thinking {
        entry.thinking_level = Some(thinking.clone());
    }
    if let Some(group_id) = &params.group_id {
        entry.group_id = Some(group_id.clone());
    }
    if let Some(group_channel) = &params.group_channel {
        entry.group_channel = Some(group_channel.clone());
    }
    if let Some(group_space) = &params.group_space {
        entry.group_space = Some(group_space.clone());
    }
}

/// Engines receive the wall-clock receipt time with the message so replies
/// can reference "now" without a clock tool.
fn with_timestamp(message: &str) -> String {
    format!(
        "[received {}] {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        message
    )
}

fn decode_attachments(params: &AgentParams) -> Result<Vec<Value>, ErrorShape> {
    let Some(attachments) = &params.attachments else {
        return Ok(Vec::new());
    };
    let mut images = Vec::new();
    let mut total_bytes = 0usize;
    for attachment in attachments {
        let Some(content) = &attachment.content else {
            continue;
        };
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|_| ErrorShape::invalid_request("attachment content is not valid base64"))?;
        total_bytes += decoded.len();
        if total_bytes > MAX_ATTACHMENT_BYTES {
            return Err(ErrorShape::invalid_request(
                "attachments exceed the 5MB limit",
            ));
        }
        images.push(json!({
            "type": attachment.kind.as_deref().unwrap_or("image"),
            "mimeType": attachment.mime_type,
            "fileName": attachment.file_name,
            "content": content,
        }));
    }
    Ok(images)
}

pub async fn handle_agent_wait(state: &GatewayState, responder: &Responder, params: Value) {
    let params: AgentWaitParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::invalid_request(format!("invalid params: {err}")))
                .await;
            return;
        }
    };
    let timeout =
        std::time::Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS));
    match state.run_jobs().wait_terminal(&params.run_id, timeout).await {
        Some(job) => {
            responder
                .ok(json!({
                    "runId": params.run_id,
                    "status": job.status,
                    "error": job.error,
                }))
                .await;
        }
        None => {
            responder
                .ok(json!({"runId": params.run_id, "status": "timeout"}))
                .await;
        }
    }
}

pub async fn handle_agent_identity(state: &GatewayState, responder: &Responder, params: Value) {
    let params: AgentIdentityParams = match serde_json::from_value(params) {
        Ok(parsed) => parsed,
        Err(err) => {
            responder
                .error(ErrorShape::invalid_request(format!("invalid params: {err}")))
                .await;
            return;
        }
    };
    let agent_id = match (&params.agent_id, &params.session_key) {
        (Some(explicit), Some(session_key)) => {
            let explicit = normalize_agent_id(explicit);
            let embedded = agent_id_from_session_key(session_key);
            if embedded != explicit {
                responder
                    .error(ErrorShape::invalid_request(format!(
                        "agentId {explicit} does not match sessionKey agent {embedded}"
                    )))
                    .await;
                return;
            }
            explicit
        }
        (Some(explicit), None) => normalize_agent_id(explicit),
        (None, Some(session_key)) => agent_id_from_session_key(session_key),
        (None, None) => "main".to_string(),
    };
    if !state.is_known_agent(&agent_id) {
        responder
            .error(ErrorShape::invalid_request(format!(
                "unknown agentId: {agent_id}"
            )))
            .await;
        return;
    }
    responder
        .ok(json!({
            "agentId": agent_id,
            "name": agent_id,
            "avatar": Value::Null,
        }))
        .await;
}
