use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

pub const API_TOKEN_ENV: &str = "AGENTFLEET_API_TOKEN";

/// The token from the environment, if one is configured.
pub fn api_token_from_env() -> Option<String> {
    std::env::var(API_TOKEN_ENV)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn is_loopback(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "::1" | "localhost")
}

pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // No token configured: open access only on loopback.
    let Some(expected) = state.api_token.as_deref() else {
        if is_loopback(&state.api_host) {
            return next.run(req).await;
        }
        return unauthorized(&format!(
            "No API token configured. Set {} before exposing the API on a non-loopback address.",
            API_TOKEN_ENV
        ));
    };

    let presented = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match presented {
        None => unauthorized("Missing or invalid Authorization header. Use: Bearer <token>"),
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(req).await
        }
        Some(_) => unauthorized("Invalid API token"),
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "code": "unauthorized", "error": message })),
    )
        .into_response()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
