use axum::extract::State;
use serde_json::json;

use crate::app_state::SharedState;
use crate::envelope::Ok;

pub async fn healthz(State(_state): State<SharedState>) -> Ok<serde_json::Value> {
    Ok(json!({ "status": "ok" }))
}
