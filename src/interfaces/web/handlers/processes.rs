use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::interfaces::web::{ApiResult, AppState};

pub async fn list_processes(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let processes = state.ctx.supervisor.list().await?;
    Ok(Json(json!({ "success": true, "processes": processes })))
}
