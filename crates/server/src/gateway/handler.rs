//! WebSocket handler for gateway client connections

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{extract_bearer_token, token_matches};
use crate::methods::{agent, exec_approval};
use crate::protocol::{ClientFrame, ErrorShape, Responder, ServerFrame};
use crate::state::GatewayState;

/// Query parameters for WebSocket connection
#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    /// Comma-separated capability list, e.g. `caps=tool-events`.
    #[serde(default)]
    pub caps: Option<String>,
    /// Session keys to subscribe to at connect time, comma-separated.
    #[serde(default)]
    pub sessions: Option<String>,
}

/// WebSocket upgrade handler
pub async fn gateway_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Response {
    let token = extract_bearer_token(&headers);
    if !token_matches(&state.config().auth_token, token) {
        warn!("Rejected gateway connection: bad or missing token");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let caps: Vec<String> = query
        .caps
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|cap| !cap.is_empty())
        .map(String::from)
        .collect();
    let sessions: Vec<String> = query
        .sessions
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(String::from)
        .collect();

    ws.on_upgrade(move |socket| handle_gateway_socket(socket, state, caps, sessions))
        .into_response()
}

/// Handle an individual gateway WebSocket connection
async fn handle_gateway_socket(
    socket: WebSocket,
    state: GatewayState,
    caps: Vec<String>,
    sessions: Vec<String>,
) {
    let conn_id = format!("conn_{}", Uuid::new_v4().simple());
    info!("New gateway connection {} caps={:?}", conn_id, caps);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for frames headed to this client
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(100);

    // Task to forward frames from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize frame: {}", e);
                }
            }
        }
    });

    state
        .connections()
        .register(conn_id.clone(), caps, tx.clone())
        .await;
    for session_key in &sessions {
        state.connections().subscribe_session(&conn_id, session_key).await;
    }

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_text_frame(&state, &conn_id, &text, tx.clone()).await;
            }
            Ok(Message::Close(_)) => {
                info!("Connection {} sent close frame", conn_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                debug!("Ping from {}", conn_id);
            }
            Ok(Message::Pong(_)) => {
                debug!("Pong from {}", conn_id);
            }
            Ok(Message::Binary(_)) => {
                warn!("Unexpected binary message from {}", conn_id);
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", conn_id, e);
                break;
            }
        }
    }

    info!("Connection {} disconnected", conn_id);
    state.connections().unregister(&conn_id).await;
    send_task.abort();
}

/// Parse one text frame and dispatch it. A frame that fails to parse still
/// gets an error response; no id can be recovered, so it goes out under an
/// empty one.
pub async fn handle_text_frame(
    state: &GatewayState,
    conn_id: &str,
    text: &str,
    tx: mpsc::Sender<ServerFrame>,
) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => dispatch_frame(state, conn_id, frame, tx).await,
        Err(e) => {
            warn!("Failed to parse frame from {}: {}", conn_id, e);
            Responder::new("", tx)
                .error(ErrorShape::invalid_request(format!("malformed frame: {e}")))
                .await;
        }
    }
}

/// Route a single req frame to its method handler.
pub async fn dispatch_frame(
    state: &GatewayState,
    conn_id: &str,
    frame: ClientFrame,
    tx: mpsc::Sender<ServerFrame>,
) {
    let ClientFrame::Req { id, method, params } = frame;
    let responder = Responder::new(id, tx);
    match method.as_str() {
        "agent" => agent::handle_agent(state, &responder, conn_id, params).await,
        "agent.execute" => agent::handle_agent_execute(state, &responder, conn_id, params).await,
        "agent.wait" => agent::handle_agent_wait(state, &responder, params).await,
        "agent.identity.get" => agent::handle_agent_identity(state, &responder, params).await,
        "agent.confirm" => exec_approval::handle_confirm(state, &responder, params).await,
        "exec.approval.request" => {
            // Requests block until resolved; run them off the read loop so
            // the same connection can still send the resolution.
            let state = state.clone();
            tokio::spawn(async move {
                exec_approval::handle_request(&state, &responder, params).await;
            });
        }
        "exec.approval.resolve" => {
            exec_approval::handle_resolve(state, &responder, params).await
        }
        other => {
            warn!("Unknown method {} from {}", other, conn_id);
            responder
                .error(ErrorShape::invalid_request(format!("unknown method: {other}")))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::StubEngine;
    use crate::state::testing::state_with_engine;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn unknown_method_gets_invalid_request() {
        let state = state_with_engine(StubEngine::replying("x"));
        let (tx, mut rx) = mpsc::channel(8);

        let frame = ClientFrame::Req {
            id: "r1".to_string(),
            method: "agent.dance".to_string(),
            params: Value::Null,
        };
        dispatch_frame(&state, "conn-1", frame, tx).await;

        match rx.recv().await.unwrap() {
            ServerFrame::Res { id, ok, error, .. } => {
                assert_eq!(id, "r1");
                assert!(!ok);
                assert!(error.unwrap().message.contains("agent.dance"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_response() {
        let state = state_with_engine(StubEngine::replying("x"));
        let (tx, mut rx) = mpsc::channel(8);

        handle_text_frame(&state, "conn-1", "{not json", tx).await;

        match rx.recv().await.unwrap() {
            ServerFrame::Res { ok, error, .. } => {
                assert!(!ok);
                assert!(error.unwrap().message.contains("malformed frame"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_agent_wait() {
        let state = state_with_engine(StubEngine::replying("x"));
        let (tx, mut rx) = mpsc::channel(8);

        let frame = ClientFrame::Req {
            id: "r2".to_string(),
            method: "agent.wait".to_string(),
            params: json!({"runId": "missing", "timeoutMs": 10}),
        };
        dispatch_frame(&state, "conn-1", frame, tx).await;

        match rx.recv().await.unwrap() {
            ServerFrame::Res { ok, payload, .. } => {
                assert!(ok);
                assert_eq!(payload.unwrap()["status"], "timeout");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
