use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

use crate::store::StoreError;

/// Errors that cross the HTTP boundary. Reply-generation and email failures
/// never reach this type; they are absorbed into degraded-but-successful
/// outcomes before the handler returns.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("session not found")]
    NotFound,
    #[error("session has ended")]
    InvalidState,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::InvalidState => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Storage(cause) = &self {
            tracing::error!("storage failure: {cause}");
        }
        let body = match &self {
            ApiError::Storage(_) => "storage failure".to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "error": body }))).into_response()
    }
}
