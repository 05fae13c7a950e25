use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{deployments, operator, processes, runs};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/deployments",
            get(deployments::list_deployments).post(deployments::create_deployment),
        )
        .route(
            "/api/deployments/{slug}",
            get(deployments::get_deployment).delete(deployments::delete_deployment),
        )
        .route(
            "/api/deployments/{slug}/stop",
            post(deployments::stop_deployment),
        )
        .route(
            "/api/deployments/{slug}/restart",
            post(deployments::restart_deployment),
        )
        .route("/api/deployments/{slug}/plan", get(deployments::get_plan))
        .route(
            "/api/deployments/{slug}/runs",
            get(runs::list_runs).post(runs::start_run),
        )
        .route(
            "/api/deployments/{slug}/optimizations",
            post(deployments::propose_optimization),
        )
        .route("/api/runs", get(runs::active_runs))
        .route("/api/runs/{run_id}/cancel", post(runs::cancel_run))
        .route("/api/processes", get(processes::list_processes))
        .route("/api/operator/actions", get(operator::list_actions))
        .route(
            "/api/operator/actions/pending",
            get(operator::list_pending_actions),
        )
        .route(
            "/api/operator/actions/{id}/approve",
            post(operator::approve_action),
        )
        .route(
            "/api/operator/actions/{id}/reject",
            post(operator::reject_action),
        )
        .route("/api/operator/cycle", post(operator::run_cycle))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}
