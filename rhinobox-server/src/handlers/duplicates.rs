use axum::extract::{Query, State};
use axum::Json;
use rhinobox_core::duplicates::{self, MergePlan, ScanReport, VerifyReport};
use rhinobox_core::hash::ContentHash;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

use crate::app_state::SharedState;
use crate::envelope::Ok;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
}

fn default_true() -> bool {
    true
}

pub async fn scan(
    State(state): State<SharedState>,
    Query(q): Query<ScanQuery>,
) -> Ok<ScanReport> {
    Ok(duplicates::scan(&state.storage.index, q.include_deleted, q.include_metadata))
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub deep: bool,
}

pub async fn verify(
    State(state): State<SharedState>,
    Query(q): Query<VerifyQuery>,
) -> Result<Ok<VerifyReport>, ApiError> {
    let report = duplicates::verify(state.storage.root(), &state.storage.index, q.deep).map_err(ApiError)?;
    Ok(report)
}

#[derive(Debug, Deserialize)]
pub struct MergeBody {
    pub hash: String,
    pub keep_path: String,
    #[serde(default)]
    pub remove_others: bool,
}

pub async fn merge(
    State(state): State<SharedState>,
    Json(body): Json<MergeBody>,
) -> Result<Ok<MergePlan>, ApiError> {
    let hash = ContentHash::from_str(&body.hash).map_err(ApiError)?;
    let plan = duplicates::merge(
        &state.storage,
        &hash,
        &body.keep_path,
        body.remove_others,
        crate::middleware::request_id::current_request_id(),
    )
    .map_err(ApiError)?;
    Ok(plan)
}

pub async fn statistics(State(state): State<SharedState>) -> Ok<serde_json::Value> {
    let report = duplicates::scan(&state.storage.index, false, false);
    Ok(json!({
        "scan_id": report.scan_id,
        "total_files": report.total_files,
        "duplicates_found": report.duplicates_found,
        "storage_wasted": report.storage_wasted,
    }))
}
