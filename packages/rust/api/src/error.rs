//! Mapping from pipeline errors to HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use leadgen_shared::LeadGenError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// A handler error carrying the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Rejected because the job is in the wrong state for the request.
    pub fn conflict(err: LeadGenError) -> Self {
        match err {
            LeadGenError::Validation { message } => Self::new(StatusCode::CONFLICT, message),
            other => other.into(),
        }
    }
}

impl From<LeadGenError> for ApiError {
    fn from(err: LeadGenError) -> Self {
        match err {
            LeadGenError::Validation { message } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
            }
            LeadGenError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, format!("{what} not found")),
            other => {
                error!(error = %other, "request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

/// Unparseable or mistyped request bodies keep axum's status but use the
/// `{"error": ...}` body.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}
