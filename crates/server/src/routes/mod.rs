//! Route handlers

pub mod health;
pub mod openapi;
pub mod skills;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::GatewayState;

/// Full application router: WS endpoint plus the HTTP control plane.
pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(crate::gateway::gateway_ws_handler))
        .merge(health::router())
        .merge(skills::router())
        .merge(openapi::router())
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::StubEngine;
    use crate::state::testing::state_with_engine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_and_openapi_respond() {
        let app = app(state_with_engine(StubEngine::replying("x")));

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn skills_reload_rejects_non_post() {
        let app = app(state_with_engine(StubEngine::replying("x")));

        let response = app
            .oneshot(Request::get("/skills/reload").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
