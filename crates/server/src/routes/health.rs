//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::GatewayState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    connections: usize,
    pending_approvals: usize,
}

async fn health_check(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: state.connections().connection_count().await,
        pending_approvals: state.approvals().pending_count().await,
    })
}

pub fn router() -> Router<GatewayState> {
    Router::new().route("/health", get(health_check))
}
