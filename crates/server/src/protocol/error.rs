//! Error codes and wire error shapes
//!
//! Two taxonomies coexist: an internal SCREAMING_CASE set for the legacy
//! RPC surface and an external snake_case set for tenant-facing contracts.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Internal/legacy surface.
    #[serde(rename = "NOT_LINKED")]
    NotLinked,
    #[serde(rename = "NOT_PAIRED")]
    NotPaired,
    #[serde(rename = "AGENT_TIMEOUT")]
    AgentTimeout,
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    // External contract (snake_case) for platform-facing APIs.
    #[serde(rename = "invalid_request")]
    ExternalInvalidRequest,
    #[serde(rename = "unauthorized")]
    ExternalUnauthorized,
    #[serde(rename = "forbidden")]
    ExternalForbidden,
    #[serde(rename = "tenant_scope_mismatch")]
    ExternalTenantScopeMismatch,
    #[serde(rename = "protocol_version_unsupported")]
    ExternalProtocolVersionUnsupported,
    #[serde(rename = "tool_confirmation_required")]
    ExternalToolConfirmationRequired,
    #[serde(rename = "upstream_timeout")]
    ExternalUpstreamTimeout,
    #[serde(rename = "rate_limited")]
    ExternalRateLimited,
    #[serde(rename = "internal_error")]
    ExternalInternalError,
}

/// Error payload carried in `res` frames and broadcast `error` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorShape {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: None,
            details: None,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn external_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ExternalInvalidRequest, message).retryable(false)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}

/// Uniform external error envelope used by the HTTP control-plane surface.
pub fn external_error_envelope(
    code: ErrorCode,
    message: &str,
    retryable: bool,
    trace_id: Option<&str>,
    request_id: &str,
) -> Value {
    json!({
        "ok": false,
        "code": code,
        "message": message,
        "retryable": retryable,
        "traceId": trace_id,
        "requestId": request_id,
    })
}
