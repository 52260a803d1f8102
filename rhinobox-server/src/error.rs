//! Maps the core's single `AppError` taxonomy onto the fixed status-code /
//! error-code table from spec.md §4.8/§7, and wraps it in the uniform error
//! envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rhinobox_core::error::AppError;
use serde::Serialize;
use serde_json::Value;

use crate::middleware::request_id::current_request_id;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Builds the uniform error envelope directly, for facade-level concerns
/// (rate limiting, IP filtering) that never pass through the core's
/// `AppError` taxonomy.
pub fn facade_error(status: StatusCode, code: &'static str, message: String, details: Option<Value>) -> Response {
    let body = ErrorEnvelope {
        error: ErrorBody {
            code,
            message,
            details,
        },
        request_id: current_request_id(),
        timestamp: chrono::Utc::now(),
    };
    (status, Json(body)).into_response()
}

fn status_and_code(err: &AppError) -> (StatusCode, &'static str) {
    match err {
        AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        AppError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        AppError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "REQUEST_TOO_LARGE"),
        AppError::RangeNotSatisfiable { .. } => {
            (StatusCode::RANGE_NOT_SATISFIABLE, "RANGE_NOT_SATISFIABLE")
        }
        AppError::Timeout => (StatusCode::REQUEST_TIMEOUT, "TIMEOUT"),
        AppError::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED"),
        AppError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

/// Newtype so handlers can `.map_err(ApiError::from)?` and return it
/// directly; `IntoResponse` renders the envelope and pulls the
/// request id from the task-local the request-id middleware populates.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = status_and_code(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }
        let details = match &self.0 {
            AppError::TooLarge { observed, max } => Some(serde_json::json!({
                "observed": observed,
                "max": max,
            })),
            AppError::RangeNotSatisfiable { size } => Some(serde_json::json!({ "size": size })),
            _ => None,
        };
        let body = ErrorEnvelope {
            error: ErrorBody {
                code,
                message: self.0.to_string(),
                details,
            },
            request_id: current_request_id(),
            timestamp: chrono::Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}
