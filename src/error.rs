use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::trip::TripStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("driver has an active trip")]
    ActiveTripExists,

    #[error("device authentication failed, check device security settings")]
    DeviceAuthFailed,

    #[error("driver application is still under review")]
    ApprovalPending,

    #[error("no driver profile found for this account")]
    DriverNotRegistered,

    #[error("invalid trip transition from {from:?} to {to:?}")]
    InvalidTransition { from: TripStatus, to: TripStatus },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::ActiveTripExists => (StatusCode::CONFLICT, self.to_string()),
            AppError::DeviceAuthFailed => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::ApprovalPending => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::DriverNotRegistered => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
