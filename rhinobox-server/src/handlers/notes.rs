//! Per-file notes: a simple CRUD veneer over a JSON-encoded array stashed at
//! `metadata["notes"]` (the data model only allows string values). `{id}`
//! resolves to a version chain's current hash when one exists, falling back
//! to treating `{id}` as a bare content hash for files with no chain.

use std::collections::BTreeMap;
use std::str::FromStr;

use axum::extract::{Path, State};
use axum::Json;
use rhinobox_core::error::AppError;
use rhinobox_core::hash::ContentHash;
use rhinobox_core::metadata_editor::{self, EditAction};
use serde::Deserialize;

use crate::app_state::SharedState;
use crate::envelope::{Created, Ok};
use crate::error::ApiError;

const NOTES_KEY: &str = "notes";

fn resolve_hash(state: &SharedState, id: &str) -> Result<ContentHash, AppError> {
    match state.versions.current(id) {
        Ok(entry) => Ok(entry.hash),
        Err(_) => ContentHash::from_str(id),
    }
}

fn read_notes(state: &SharedState, hash: &ContentHash) -> Result<Vec<String>, AppError> {
    let record = state
        .storage
        .index
        .get(hash)
        .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;
    match record.metadata.get(NOTES_KEY) {
        Some(raw) => Ok(serde_json::from_str(raw).unwrap_or_default()),
        None => Ok(Vec::new()),
    }
}

fn write_notes(state: &SharedState, hash: &ContentHash, notes: &[String]) -> Result<(), AppError> {
    let mut data = BTreeMap::new();
    data.insert(NOTES_KEY.to_string(), serde_json::to_string(notes).unwrap());
    metadata_editor::apply_edit(
        &state.storage,
        hash,
        EditAction::Merge(data),
        None,
        crate::middleware::request_id::current_request_id(),
    )?;
    Ok(())
}

pub async fn list(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Ok<Vec<String>>, ApiError> {
    let hash = resolve_hash(&state, &id).map_err(ApiError)?;
    Ok(read_notes(&state, &hash).map_err(ApiError)?)
}

#[derive(Debug, Deserialize)]
pub struct NoteBody {
    pub note: String,
}

pub async fn add(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<NoteBody>,
) -> Result<Created<Vec<String>>, ApiError> {
    let hash = resolve_hash(&state, &id).map_err(ApiError)?;
    let mut notes = read_notes(&state, &hash).map_err(ApiError)?;
    notes.push(body.note);
    write_notes(&state, &hash, &notes).map_err(ApiError)?;
    Ok(Created(notes))
}

pub async fn replace(
    State(state): State<SharedState>,
    Path((id, index)): Path<(String, usize)>,
    Json(body): Json<NoteBody>,
) -> Result<Ok<Vec<String>>, ApiError> {
    let hash = resolve_hash(&state, &id).map_err(ApiError)?;
    let mut notes = read_notes(&state, &hash).map_err(ApiError)?;
    let slot = notes
        .get_mut(index)
        .ok_or_else(|| ApiError(AppError::NotFound(format!("no note at index {index}"))))?;
    *slot = body.note;
    write_notes(&state, &hash, &notes).map_err(ApiError)?;
    Ok(notes)
}

pub async fn remove(
    State(state): State<SharedState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Ok<Vec<String>>, ApiError> {
    let hash = resolve_hash(&state, &id).map_err(ApiError)?;
    let mut notes = read_notes(&state, &hash).map_err(ApiError)?;
    if index >= notes.len() {
        return Err(ApiError(AppError::NotFound(format!("no note at index {index}"))));
    }
    notes.remove(index);
    write_notes(&state, &hash, &notes).map_err(ApiError)?;
    Ok(notes)
}

pub async fn clear(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Ok<Vec<String>>, ApiError> {
    let hash = resolve_hash(&state, &id).map_err(ApiError)?;
    write_notes(&state, &hash, &[]).map_err(ApiError)?;
    Ok(Vec::new())
}
