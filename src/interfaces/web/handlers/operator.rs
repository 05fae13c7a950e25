use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::{Value, json};

use crate::core::error::FleetError;
use crate::core::registry::ActionFilter;
use crate::interfaces::web::{ApiResult, AppState};

pub async fn list_actions(
    Query(filter): Query<ActionFilter>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let actions = state.ctx.registry.list_operator_actions(&filter).await?;
    Ok(Json(json!({ "success": true, "actions": actions })))
}

pub async fn list_pending_actions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let actions = state
        .ctx
        .registry
        .list_operator_actions(&ActionFilter::pending())
        .await?;
    Ok(Json(json!({ "success": true, "actions": actions })))
}

pub async fn approve_action(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let action = state.ctx.operator.operator().approve(&id).await?;
    Ok(Json(json!({ "success": true, "action": action })))
}

pub async fn reject_action(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let action = state.ctx.operator.operator().reject(&id).await?;
    Ok(Json(json!({ "success": true, "action": action })))
}

pub async fn run_cycle(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match state.ctx.operator.try_cycle().await {
        Some(report) => {
            let report = report?;
            Ok(Json(json!({ "success": true, "report": report })))
        }
        None => Err(FleetError::Conflict("an operator cycle is already running".to_string()).into()),
    }
}
