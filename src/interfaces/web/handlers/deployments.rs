use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::deploy::Bundle;
use crate::core::plan;
use crate::interfaces::web::{ApiResult, AppState};

pub async fn create_deployment(
    State(state): State<AppState>,
    Json(bundle): Json<Bundle>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let record = state.ctx.orchestrator.deploy(&bundle).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "deployment": record })),
    ))
}

pub async fn list_deployments(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let deployments = state.ctx.registry.list_deployments().await?;
    Ok(Json(json!({ "success": true, "deployments": deployments })))
}

pub async fn get_deployment(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let (deployment, process) = state.ctx.orchestrator.status(&slug).await?;
    Ok(Json(json!({
        "success": true,
        "deployment": deployment,
        "process": process,
    })))
}

pub async fn delete_deployment(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let record = state.ctx.orchestrator.undeploy(&slug).await?;
    Ok(Json(json!({ "success": true, "deployment": record })))
}

pub async fn stop_deployment(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let record = state.ctx.orchestrator.stop(&slug).await?;
    Ok(Json(json!({ "success": true, "deployment": record })))
}

pub async fn restart_deployment(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let process = state.ctx.orchestrator.restart(&slug).await?;
    Ok(Json(json!({ "success": true, "process": process })))
}

pub async fn get_plan(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let record = state.ctx.registry.require_deployment(&slug).await?;
    let plan = plan::compile(&record.graph);
    Ok(Json(json!({ "success": true, "plan": plan })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeOptimizationRequest {
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    pub changes: Value,
}

pub async fn propose_optimization(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<ProposeOptimizationRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let action = state
        .ctx
        .operator
        .operator()
        .propose_optimization(
            &slug,
            payload.action_type.trim(),
            &payload.description,
            &payload.changes,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "action": action })),
    ))
}
