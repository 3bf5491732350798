//! Agent gateway server
//!
//! WebSocket RPC for agent execution plus a small HTTP control-plane
//! surface (skills reload, OpenAPI, health).

mod approval;
mod auth;
mod engine;
mod events;
mod gateway;
mod methods;
mod protocol;
mod routes;
mod state;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::engine::EchoEngine;
use crate::state::{GatewayConfig, GatewayState};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env();
    let bind_addr = config.bind_addr.clone();
    if config.auth_token.is_empty() {
        tracing::warn!("GATEWAY_TOKEN is unset; accepting unauthenticated connections");
    }
    tracing::info!("Known agents: {:?}", config.known_agents);

    let state = GatewayState::new(config, Arc::new(EchoEngine));
    let app = routes::app(state);

    tracing::info!("Gateway listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
