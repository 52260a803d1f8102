//! Success envelope: `{data, timestamp, request_id}`, per spec.md §6.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::middleware::request_id::current_request_id;

#[derive(Debug, Serialize)]
struct Envelope<T> {
    data: T,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

pub struct Ok<T>(pub T);

impl<T: Serialize> IntoResponse for Ok<T> {
    fn into_response(self) -> Response {
        Json(Envelope {
            data: self.0,
            timestamp: chrono::Utc::now(),
            request_id: current_request_id(),
        })
        .into_response()
    }
}

pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (
            StatusCode::CREATED,
            Json(Envelope {
                data: self.0,
                timestamp: chrono::Utc::now(),
                request_id: current_request_id(),
            }),
        )
            .into_response()
    }
}
