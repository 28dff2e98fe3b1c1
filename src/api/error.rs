//! Mapping of queue errors onto HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::error::QueueError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("malformed request body: {0}")]
    BadBody(String),

    /// The path id is not a job id at all.
    #[error("job {0} not found")]
    UnknownJob(String),

    /// Unknown, already running or already finished.
    #[error("job {0} not found or not cancellable")]
    NotCancellable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Queue(e) if e.is_caller_error() => StatusCode::BAD_REQUEST,
            ApiError::Queue(_) | ApiError::UnknownJob(_) | ApiError::NotCancellable(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::MissingField(_) | ApiError::BadBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Queue(e) => e.code(),
            ApiError::MissingField(_) => "missing_field",
            ApiError::BadBody(_) => "bad_body",
            ApiError::UnknownJob(_) => "not_found",
            ApiError::NotCancellable(_) => "not_cancellable",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
