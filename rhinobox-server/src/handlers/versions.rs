use std::io::Cursor;

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use rhinobox_core::error::AppError;
use rhinobox_core::models::VersionEntry;
use rhinobox_core::storage::IngestInput;
use rhinobox_core::versions::VersionDiff;
use serde::Deserialize;

use crate::app_state::SharedState;
use crate::envelope::{Created, Ok};
use crate::error::ApiError;

pub async fn list(
    State(state): State<SharedState>,
    Path(file_id): Path<String>,
) -> Result<Ok<Vec<VersionEntry>>, ApiError> {
    Ok(state.versions.list(&file_id).map_err(ApiError)?)
}

pub async fn get(
    State(state): State<SharedState>,
    Path((file_id, version)): Path<(String, u64)>,
) -> Result<Ok<VersionEntry>, ApiError> {
    Ok(state.versions.get(&file_id, version).map_err(ApiError)?)
}

pub async fn current(
    State(state): State<SharedState>,
    Path(file_id): Path<String>,
) -> Result<Ok<VersionEntry>, ApiError> {
    Ok(state.versions.current(&file_id).map_err(ApiError)?)
}

/// `POST /files/{id}/versions`: ingest a new revision's bytes via the
/// storage manager, then record the resulting hash as the chain's next
/// version.
pub async fn upload(
    State(state): State<SharedState>,
    Path(file_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Created<VersionEntry>, ApiError> {
    let mut uploaded_by = None;
    let mut comment = None;
    let mut ingested = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?
    {
        match field.name().unwrap_or("") {
            "uploaded_by" => {
                uploaded_by = Some(field.text().await.map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?);
            }
            "comment" => {
                comment = Some(field.text().await.map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?);
            }
            _ => {
                let file_name = field.file_name().unwrap_or("version").to_string();
                let mime_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream().to_string());
                let bytes = field.bytes().await.map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?;
                let result = state
                    .storage
                    .ingest(IngestInput {
                        filename: file_name,
                        declared_mime_type: mime_type,
                        reader: Cursor::new(bytes),
                    })
                    .map_err(ApiError)?;
                ingested = Some(result);
            }
        }
    }

    let result = ingested.ok_or_else(|| ApiError(AppError::Validation("no file part supplied".into())))?;
    let entry = state
        .versions
        .upload_new_version(&file_id, result.record.hash, result.record.size, uploaded_by, comment)
        .map_err(ApiError)?;
    Ok(Created(entry))
}

#[derive(Debug, Deserialize)]
pub struct RevertBody {
    pub version: u64,
}

pub async fn revert(
    State(state): State<SharedState>,
    Path(file_id): Path<String>,
    Json(body): Json<RevertBody>,
) -> Result<Ok<VersionEntry>, ApiError> {
    Ok(state.versions.revert(&file_id, body.version).map_err(ApiError)?)
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    pub from: u64,
    pub to: u64,
}

pub async fn diff(
    State(state): State<SharedState>,
    Path(file_id): Path<String>,
    Query(q): Query<DiffQuery>,
) -> Result<Ok<VersionDiff>, ApiError> {
    Ok(state.versions.diff(&file_id, q.from, q.to).map_err(ApiError)?)
}

/// Deleting a single version would break the dense `1..N` prefix invariant
/// (I3) without a defined renumbering policy; the specification source
/// does not settle that policy, so this is intentionally left
/// unimplemented rather than silently violating I3.
pub async fn delete_version(
    State(_state): State<SharedState>,
    Path((_file_id, _version)): Path<(String, u64)>,
) -> ApiError {
    ApiError(AppError::NotImplemented(
        "deleting a single version would break the dense version-prefix invariant; not supported".into(),
    ))
}
