use axum::extract::State;
use serde_json::json;

use crate::app_state::SharedState;
use crate::envelope::Ok;

/// Public runtime flags only — never the full `Config` (no filesystem
/// paths, no IP lists).
pub async fn public_config(State(state): State<SharedState>) -> Ok<serde_json::Value> {
    let cfg = &state.config;
    Ok(json!({
        "max_request_bytes": cfg.max_request_bytes,
        "rate_limit": {
            "requests": cfg.rate_limit.requests,
            "window_secs": cfg.rate_limit.window_secs,
            "burst": cfg.rate_limit.burst,
        },
        "cors": {
            "allowed_origins": cfg.cors.allowed_origins,
        },
    }))
}
