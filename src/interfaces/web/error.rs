use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::core::error::FleetError;

/// HTTP face of a [`FleetError`]. Domain errors carry their message; anything
/// else is logged in full and answered with a fixed message.
#[derive(Debug)]
pub struct ApiError(pub FleetError);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0);
            match self.0.step() {
                Some(step) => format!("deployment failed at step `{}`", step),
                None => "internal server error".to_string(),
            }
        } else {
            self.0.to_string()
        };
        (
            status,
            Json(json!({ "success": false, "code": code, "error": message })),
        )
            .into_response()
    }
}
