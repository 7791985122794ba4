//! Maps [`ApiError`] onto the HTTP status codes in §6's route table.
//!
//! `ApiError` lives in `driftroom-core`, which has no `axum` dependency, so
//! the orphan rule forbids implementing `IntoResponse` for it there. This
//! newtype carries the impl instead.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use driftroom_core::{ApiError, ValidationKind};
use serde_json::json;
use tracing::error;

/// Wraps an [`ApiError`] so route handlers can `?`-propagate it and have
/// axum turn it into the right status code and `{error}` JSON body.
pub struct ApiErrorResponse(pub ApiError);

impl From<ApiError> for ApiErrorResponse {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ApiError::AuthFailure(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::StateConflict(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::CapacityExhausted(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::ValidationFailure(kind, msg) => {
                let status = match kind {
                    ValidationKind::BadRequest => StatusCode::BAD_REQUEST,
                    ValidationKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                    ValidationKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                };
                (status, msg.clone())
            }
            ApiError::CryptoFailure(_) => {
                error!(error = %self.0, "crypto failure on request path");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
            }
            ApiError::StorageFailure(msg) => {
                error!(error = %msg, "storage failure on request path");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
