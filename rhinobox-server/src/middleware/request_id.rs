//! Request ID injection. Reflects an inbound `X-Request-Id` or mints one
//! (uuid v4), stores it in a task-local for the duration of the request so
//! the error envelope and access log can read it back without threading it
//! through every handler signature, and stamps it on the response.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;

tokio::task_local! {
    static REQUEST_ID: String;
}

pub const HEADER_NAME: &str = "x-request-id";

/// `None` outside of request handling (e.g. background tasks).
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.headers_mut().insert(
        HEADER_NAME,
        HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );

    let id_for_response = id.clone();
    let mut response = REQUEST_ID.scope(id, next.run(req)).await;
    if let Ok(value) = HeaderValue::from_str(&id_for_response) {
        response.headers_mut().insert(HEADER_NAME, value);
    }
    response
}
