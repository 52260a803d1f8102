use axum::extract::{Query, State};
use axum::Json;
use rhinobox_core::classifier;
use rhinobox_core::models::RoutingRule;
use serde::Deserialize;
use serde_json::json;

use crate::app_state::SharedState;
use crate::envelope::{Created, Ok};
use crate::error::ApiError;

pub async fn list(State(state): State<SharedState>) -> Ok<Vec<RoutingRule>> {
    Ok(state.storage.routing_rules.list())
}

#[derive(Debug, Deserialize)]
pub struct RuleBody {
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub destination: Vec<String>,
}

pub async fn add(
    State(state): State<SharedState>,
    Json(body): Json<RuleBody>,
) -> Result<Created<RoutingRule>, ApiError> {
    let rule = state
        .storage
        .routing_rules
        .add(body.extension, body.mime_type, body.destination)
        .map_err(ApiError)?;
    Ok(Created(rule))
}

pub async fn update(
    State(state): State<SharedState>,
    Json(body): Json<RuleBody>,
) -> Result<Ok<RoutingRule>, ApiError> {
    let rule = state
        .storage
        .routing_rules
        .update(body.extension, body.mime_type, body.destination)
        .map_err(ApiError)?;
    Ok(rule)
}

#[derive(Debug, Deserialize)]
pub struct IdentityQuery {
    pub extension: Option<String>,
    pub mime_type: Option<String>,
}

pub async fn remove(
    State(state): State<SharedState>,
    Query(q): Query<IdentityQuery>,
) -> Result<Ok<serde_json::Value>, ApiError> {
    state.storage.routing_rules.remove(q.extension, q.mime_type).map_err(ApiError)?;
    Ok(json!({ "removed": true }))
}

/// `GET /routing-rules/suggest`: what the built-in tables alone would pick,
/// ignoring any learned rule — useful for a client deciding whether to add
/// one.
pub async fn suggest(Query(q): Query<IdentityQuery>) -> Ok<serde_json::Value> {
    match classifier::suggest_builtin(q.extension.as_deref(), q.mime_type.as_deref()) {
        Some((category, subcategory)) => Ok(json!({ "category": category, "subcategory": subcategory })),
        None => Ok(json!({ "category": "other", "subcategory": "unknown" })),
    }
}
