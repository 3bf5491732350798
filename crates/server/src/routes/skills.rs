//! Skills reload control-plane endpoint
//!
//! `POST /skills/reload` is declarative: the caller states the desired
//! skill set and hash, the gateway acknowledges. Replays within the TTL
//! window return the original body byte-for-byte, including `requestId`
//! and `acceptedAtMs`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use gateway_core::dedupe::DedupeEntry;

use crate::auth::{extract_bearer_token, token_matches};
use crate::protocol::{external_error_envelope, ErrorCode};
use crate::state::{GatewayState, SKILLS_REPLAY_TTL_MS};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkillsReloadBody {
    tenant_id: Option<String>,
    agent_scope: Option<String>,
    desired_hash: Option<String>,
    #[serde(default)]
    skills: Option<Vec<SkillSpec>>,
    protocol_version: Option<String>,
    trace_id: Option<String>,
    load_actions: Option<Vec<String>>,
    unload_actions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SkillSpec {
    key: Option<String>,
    version: Option<String>,
    checksum: Option<String>,
}

async fn skills_reload(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let (status, value) = process(&state, &headers, &body).await;
    (status, Json(value))
}

async fn process(state: &GatewayState, headers: &HeaderMap, body: &[u8]) -> (StatusCode, Value) {
    let request_id = format!("req_{}", Uuid::new_v4().simple());

    if !token_matches(&state.config().auth_token, extract_bearer_token(headers)) {
        return (
            StatusCode::UNAUTHORIZED,
            external_error_envelope(
                ErrorCode::ExternalUnauthorized,
                "missing or invalid bearer token",
                false,
                None,
                &request_id,
            ),
        );
    }

    let parsed: SkillsReloadBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            return invalid(&request_id, None, &format!("invalid JSON body: {err}"));
        }
    };
    let trace_id = parsed.trace_id.clone();

    let protocol_version = match parsed.protocol_version.as_deref() {
        Some(version @ ("v1" | "v2")) => version.to_string(),
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                external_error_envelope(
                    ErrorCode::ExternalProtocolVersionUnsupported,
                    &format!("unsupported protocolVersion: {other}"),
                    false,
                    trace_id.as_deref(),
                    &request_id,
                ),
            );
        }
        None => return invalid(&request_id, trace_id.as_deref(), "protocolVersion is required"),
    };

    let Some(tenant_id) = non_empty(parsed.tenant_id.as_deref()) else {
        return invalid(&request_id, trace_id.as_deref(), "tenantId is required");
    };
    let Some(agent_scope) = non_empty(parsed.agent_scope.as_deref()) else {
        return invalid(&request_id, trace_id.as_deref(), "agentScope is required");
    };
    let Some(desired_hash) = non_empty(parsed.desired_hash.as_deref()) else {
        return invalid(&request_id, trace_id.as_deref(), "desiredHash is required");
    };
    let Some(skills) = &parsed.skills else {
        return invalid(&request_id, trace_id.as_deref(), "skills array is required");
    };
    for (index, skill) in skills.iter().enumerate() {
        if non_empty(skill.key.as_deref()).is_none()
            || non_empty(skill.version.as_deref()).is_none()
            || non_empty(skill.checksum.as_deref()).is_none()
        {
            return invalid(
                &request_id,
                trace_id.as_deref(),
                &format!("skills[{index}] requires key, version and checksum"),
            );
        }
    }
    if protocol_version == "v2" {
        if non_empty(trace_id.as_deref()).is_none() {
            return invalid(&request_id, None, "traceId is required for protocolVersion v2");
        }
        if parsed.load_actions.is_none() || parsed.unload_actions.is_none() {
            return invalid(
                &request_id,
                trace_id.as_deref(),
                "loadActions and unloadActions are required for protocolVersion v2",
            );
        }
    }
    let load_actions = parsed.load_actions.clone().unwrap_or_default();
    let unload_actions = parsed.unload_actions.clone().unwrap_or_default();

    // Idempotency over the declarative identity of the request.
    let cache_key = format!("skills:{tenant_id}:{agent_scope}:{desired_hash}:{protocol_version}");
    let now = gateway_core::now_ms();
    state.skills_cache().prune(now, SKILLS_REPLAY_TTL_MS).await;
    if let Some(entry) = state.skills_cache().get(&cache_key).await {
        info!("replaying skills reload for {}", cache_key);
        return (StatusCode::OK, entry.payload);
    }

    let response = json!({
        "ok": true,
        "executionMode": "control-plane-only",
        "tenantId": tenant_id,
        "agentScope": agent_scope,
        "desiredHash": desired_hash,
        "acceptedAtMs": now,
        "requestId": request_id,
        "summary": {
            "protocolVersion": protocol_version,
            "traceId": trace_id,
            "skillsCount": skills.len(),
            "loadActions": load_actions,
            "unloadActions": unload_actions,
        },
    });
    state
        .skills_cache()
        .set(&cache_key, DedupeEntry::ok(now, response.clone()))
        .await;
    info!(
        "accepted skills reload tenant={} scope={} hash={}",
        tenant_id, agent_scope, desired_hash
    );
    (StatusCode::OK, response)
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn invalid(request_id: &str, trace_id: Option<&str>, message: &str) -> (StatusCode, Value) {
    (
        StatusCode::BAD_REQUEST,
        external_error_envelope(
            ErrorCode::ExternalInvalidRequest,
            message,
            false,
            trace_id,
            request_id,
        ),
    )
}

pub fn router() -> Router<GatewayState> {
    Router::new().route("/skills/reload", post(skills_reload))
}
