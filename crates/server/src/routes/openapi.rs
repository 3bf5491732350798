//! OpenAPI document and Swagger viewer
//!
//! OpenAPI does not model WS RPC methods natively, so the WS contract is
//! attached to `/ws` through an `x-gateway-websocket` extension field.

use axum::{
    http::{header::HOST, HeaderMap},
    response::Html,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::GatewayState;

const SWAGGER_UI_DIST_CDN: &str = "https://unpkg.com/swagger-ui-dist@5";

fn agent_execute_request_schema() -> Value {
    json!({
        "type": "object",
        "required": [
            "tenantId", "agentScope", "sessionKey", "agentId", "operation",
            "input", "traceId", "protocolVersion", "idempotencyKey",
        ],
        "properties": {
            "tenantId": {"type": "string", "description": "External tenant identifier."},
            "agentScope": {"type": "string", "description": "Per-tenant logical agent scope."},
            "sessionKey": {
                "type": "string",
                "description": "Scoped session key. Preferred format: tenant:<tenantId>:scope:<agentScope>:<channel>.",
            },
            "agentId": {"type": "string", "description": "Gateway-internal agent id.", "example": "main"},
            "operation": {
                "type": "string",
                "enum": ["chat", "run"],
                "description": "chat=conversation, run=task-style execution.",
            },
            "mode": {
                "type": "string",
                "enum": ["stream", "unary"],
                "description": "Optional transport mode. run defaults to unary, chat defaults to stream.",
            },
            "input": {
                "type": "object",
                "additionalProperties": true,
                "description": "Input payload. Common fields: input.message or input.prompt.",
            },
            "traceId": {"type": "string", "description": "End-to-end trace id from the caller."},
            "protocolVersion": {"type": "string", "enum": ["v1", "v2"]},
            "idempotencyKey": {"type": "string", "description": "Deduplication key for caller retries."},
            "timeout": {"type": "integer", "minimum": 0, "description": "Optional timeout in seconds."},
            "thinking": {"type": "string", "description": "Optional reasoning profile override."},
            "deliver": {"type": "boolean", "description": "Whether to deliver the response to a channel integration."},
            "channel": {"type": "string", "description": "Optional outbound channel."},
            "to": {"type": "string", "description": "Optional outbound recipient."},
        },
        "additionalProperties": false,
    })
}

fn agent_confirm_request_schema() -> Value {
    json!({
        "type": "object",
        "required": ["confirmationId", "approved", "traceId"],
        "properties": {
            "confirmationId": {
                "type": "string",
                "description": "Identifier from the tool.state awaiting_input event.",
            },
            "approved": {"type": "boolean", "description": "true=allow-once, false=deny."},
            "traceId": {"type": "string"},
        },
        "additionalProperties": false,
    })
}

fn build_document(origin: &str) -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Agent Gateway External Contract",
            "version": "v2",
            "description": "External integration surface for control plane and agent execution. Includes HTTP and WebSocket RPC contract notes.",
        },
        "servers": [{"url": origin, "description": "Current gateway endpoint"}],
        "tags": [
            {"name": "control-plane", "description": "Control plane APIs for skills and runtime governance."},
            {"name": "agent-execution", "description": "External agent execution contract over the gateway WebSocket RPC."},
        ],
        "paths": {
            "/skills/reload": {
                "post": {
                    "tags": ["control-plane"],
                    "summary": "Reload skill plan for tenant scope",
                    "description": "External control-plane endpoint. v2 requires traceId, loadActions and unloadActions.",
                    "operationId": "skillsReload",
                    "security": [{"BearerAuth": []}],
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/SkillsReloadRequest"}}},
                    },
                    "responses": {
                        "200": {
                            "description": "Accepted (idempotent).",
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/SkillsReloadSuccess"}}},
                        },
                        "400": {
                            "description": "Invalid request or unsupported protocol.",
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ExternalErrorResponse"}}},
                        },
                        "401": {
                            "description": "Unauthorized.",
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ExternalErrorResponse"}}},
                        },
                    },
                },
            },
            "/ws": {
                "get": {
                    "tags": ["agent-execution"],
                    "summary": "Gateway WebSocket RPC endpoint",
                    "description": "Use WebSocket framing (req/res/event) and invoke methods agent.execute and agent.confirm.",
                    "operationId": "gatewayWebSocket",
                    "security": [{"BearerAuth": []}],
                    "responses": {"101": {"description": "Switching Protocols"}},
                    "x-gateway-websocket": {
                        "protocol": "json-rpc-like over WebSocket frames",
                        "methods": {
                            "agent.execute": {
                                "request": {"$ref": "#/components/schemas/AgentExecuteRequest"},
                                "lifecycleEvents": [
                                    "agent.start", "agent.delta", "agent.message",
                                    "tool.state", "context.patch", "agent.end", "error",
                                ],
                                "notes": [
                                    "chat defaults to stream mode",
                                    "run defaults to unary mode",
                                    "sessionKey must match the tenant scope contract",
                                ],
                            },
                            "agent.confirm": {
                                "request": {"$ref": "#/components/schemas/AgentConfirmRequest"},
                                "notes": [
                                    "Use confirmationId from tool.state awaiting_input",
                                    "approved=true maps to allow-once, false maps to deny",
                                ],
                            },
                        },
                    },
                },
            },
        },
        "components": {
            "securitySchemes": {
                "BearerAuth": {"type": "http", "scheme": "bearer", "bearerFormat": "gateway token"},
            },
            "schemas": {
                "SkillsReloadRequest": {
                    "type": "object",
                    "required": ["tenantId", "agentScope", "desiredHash", "skills", "protocolVersion"],
                    "properties": {
                        "tenantId": {"type": "string"},
                        "agentScope": {"type": "string"},
                        "desiredHash": {"type": "string", "description": "Desired skill plan hash."},
                        "protocolVersion": {"type": "string", "enum": ["v1", "v2"]},
                        "traceId": {"type": "string"},
                        "skills": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["key", "version", "checksum"],
                                "properties": {
                                    "key": {"type": "string"},
                                    "version": {"type": "string"},
                                    "checksum": {"type": "string"},
                                },
                            },
                        },
                        "loadActions": {"type": "array", "items": {"type": "string"}},
                        "unloadActions": {"type": "array", "items": {"type": "string"}},
                    },
                    "additionalProperties": false,
                },
                "SkillsReloadSuccess": {
                    "type": "object",
                    "required": [
                        "ok", "executionMode", "tenantId", "agentScope",
                        "desiredHash", "acceptedAtMs", "requestId", "summary",
                    ],
                    "properties": {
                        "ok": {"type": "boolean", "const": true},
                        "executionMode": {"type": "string", "const": "control-plane-only"},
                        "tenantId": {"type": "string"},
                        "agentScope": {"type": "string"},
                        "desiredHash": {"type": "string"},
                        "acceptedAtMs": {"type": "number"},
                        "requestId": {"type": "string"},
                        "summary": {
                            "type": "object",
                            "properties": {
                                "protocolVersion": {"type": "string", "enum": ["v1", "v2"]},
                                "traceId": {"type": ["string", "null"]},
                                "skillsCount": {"type": "integer"},
                                "loadActions": {"type": "array", "items": {"type": "string"}},
                                "unloadActions": {"type": "array", "items": {"type": "string"}},
                            },
                        },
                    },
                    "additionalProperties": false,
                },
                "ExternalErrorResponse": {
                    "type": "object",
                    "required": ["ok", "code", "message", "retryable", "traceId", "requestId"],
                    "properties": {
                        "ok": {"type": "boolean", "const": false},
                        "code": {
                            "type": "string",
                            "enum": [
                                "invalid_request", "unauthorized", "forbidden",
                                "tenant_scope_mismatch", "protocol_version_unsupported",
                                "tool_confirmation_required", "upstream_timeout",
                                "rate_limited", "internal_error",
                            ],
                        },
                        "message": {"type": "string"},
                        "retryable": {"type": "boolean"},
                        "traceId": {"type": ["string", "null"]},
                        "requestId": {"type": "string"},
                    },
                    "additionalProperties": false,
                },
                "AgentExecuteRequest": agent_execute_request_schema(),
                "AgentConfirmRequest": agent_confirm_request_schema(),
            },
        },
    })
}

async fn openapi_json(headers: HeaderMap) -> Json<Value> {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    Json(build_document(&format!("http://{host}")))
}

async fn swagger_ui() -> Html<String> {
    Html(format!(
        r##"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Agent Gateway API Docs</title>
    <link rel="stylesheet" href="{cdn}/swagger-ui.css" />
    <style>
      body {{ margin: 0; background: #fafafa; }}
      .topbar {{ display: none; }}
    </style>
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="{cdn}/swagger-ui-bundle.js"></script>
    <script>
      window.ui = SwaggerUIBundle({{
        url: "/openapi.json",
        dom_id: "#swagger-ui",
        deepLinking: true,
        displayRequestDuration: true,
      }});
    </script>
  </body>
</html>"##,
        cdn = SWAGGER_UI_DIST_CDN
    ))
}

pub fn router() -> Router<GatewayState> {
    Router::new()
        .route("/openapi.json", get(openapi_json))
        .route("/swagger", get(swagger_ui))
}
