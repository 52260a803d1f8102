//! Request size limit (spec.md §4.8): `Content-Length` is checked first for
//! a precise 413 with observed/max; `DefaultBodyLimit` (layered separately in
//! `main.rs`) is the stream-level backstop for chunked or absent
//! `Content-Length` requests.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rhinobox_core::error::AppError;

use crate::app_state::SharedState;
use crate::error::ApiError;

pub async fn size_limit_middleware(
    State(state): State<SharedState>,
    req: Request,
    next: Next,
) -> Response {
    let max = state.config.max_request_bytes;
    if let Some(len) = req
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if len > max {
            return ApiError(AppError::TooLarge { observed: len, max }).into_response();
        }
    }
    next.run(req).await
}
