//! Bearer-token auth shared by the WS upgrade and HTTP routes.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Constant shape for "is this caller allowed in at all". An empty
/// configured token disables auth (local development).
pub fn token_matches(configured: &str, presented: Option<&str>) -> bool {
    if configured.is_empty() {
        return true;
    }
    presented == Some(configured)
}
