mod health;
mod reports;

pub use health::health_routes;
pub use reports::report_routes;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::error::{AddressError, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRequest {
    #[serde(default)]
    pub address: String,
}

/// Reply to submit, retry and clear requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ReportResponse {
    pub fn ok(report_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            report_id,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error returned from request handlers, rendered as `{success: false, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<AddressError> for ApiError {
    fn from(err: AddressError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

// Malformed bodies still get the JSON error payload rather than axum's plain-text rejection.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound("Report not found".to_string()),
            StoreError::NotReady { .. }
            | StoreError::NotRetryable(_)
            | StoreError::StillRunning(_)
            | StoreError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            StoreError::Unrenderable(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(message) => {
                error!("Internal error: {message}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ReportResponse {
            success: false,
            report_id: None,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
