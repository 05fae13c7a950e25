use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::interfaces::web::{ApiResult, AppState};

const DEFAULT_HISTORY_LIMIT: u32 = 20;
const MAX_HISTORY_LIMIT: u32 = 200;

#[derive(Deserialize, Default)]
pub struct StartRunRequest {
    #[serde(default)]
    pub input: Value,
    /// Block until the run finishes and return its result.
    #[serde(default)]
    pub wait: bool,
}

pub async fn start_run(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<StartRunRequest>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    if payload.wait {
        let (run_id, result) = state.ctx.runs.run(&slug, payload.input, "api").await?;
        return Ok((
            StatusCode::OK,
            Json(json!({ "success": true, "runId": run_id, "result": result })),
        ));
    }
    let run_id = state.ctx.runs.start(&slug, payload.input, "api").await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "runId": run_id })),
    ))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

pub async fn list_runs(
    Path(slug): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let record = state.ctx.registry.require_deployment(&slug).await?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let runs = state.ctx.registry.list_executions(&record.id, limit).await?;
    Ok(Json(json!({ "success": true, "runs": runs })))
}

pub async fn active_runs(State(state): State<AppState>) -> Json<Value> {
    let runs = state.ctx.runs.runs().active().await;
    Json(json!({ "success": true, "runs": runs }))
}

pub async fn cancel_run(
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    state.ctx.runs.cancel(&run_id).await?;
    Ok(Json(json!({ "success": true, "message": "Cancellation requested" })))
}
