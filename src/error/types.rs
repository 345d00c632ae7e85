//! API error types

use crate::pipeline::PipelineError;
use crate::sandbox::ExecutionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The sandbox could not be prepared
    #[error("Sandbox setup failed: {0}")]
    Setup(String),

    #[error("Execution backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Setup(e) => ApiError::Setup(e.to_string()),
            PipelineError::Execution(ExecutionError::BackendUnreachable(msg)) => {
                ApiError::BackendUnavailable(msg)
            }
            PipelineError::Execution(e) => ApiError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Setup(_) => StatusCode::FAILED_DEPENDENCY,
            ApiError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "invalid_request_error",
            ApiError::Setup(_) => "setup_error",
            ApiError::BackendUnavailable(_) => "backend_unavailable",
            ApiError::Internal(_) => "api_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();
        let message = match self {
            ApiError::InvalidRequest(msg)
            | ApiError::Setup(msg)
            | ApiError::BackendUnavailable(msg) => msg,
            ApiError::Internal(err) => err.to_string(),
        };

        let body = Json(ErrorResponse {
            type_: "error".to_string(),
            error: ErrorDetail {
                type_: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    #[serde(rename = "type")]
    type_: String,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    type_: String,
    message: String,
}
