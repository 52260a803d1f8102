use std::str::FromStr;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rhinobox_core::error::AppError;
use rhinobox_core::hash::ContentHash;
use rhinobox_core::index::SearchQuery;
use rhinobox_core::metadata_editor::{self, EditAction};
use rhinobox_core::models::FileRecord;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::app_state::SharedState;
use crate::envelope::Ok;
use crate::error::ApiError;

fn parse_hash(raw: &str) -> Result<ContentHash, ApiError> {
    ContentHash::from_str(raw).map_err(ApiError)
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub hash: Option<String>,
    pub name: Option<String>,
    pub extension: Option<String>,
    pub mime_prefix: Option<String>,
    pub category: Option<String>,
    pub uploaded_after: Option<DateTime<Utc>>,
    pub uploaded_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_deleted: bool,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchParams>,
) -> Result<Ok<serde_json::Value>, ApiError> {
    let hash = params.hash.map(|h| ContentHash::from_str(&h)).transpose().map_err(ApiError)?;
    let result = state.storage.index.search(SearchQuery {
        hash,
        name_contains: params.name,
        extension: params.extension,
        mime_prefix: params.mime_prefix,
        category_prefix: params.category,
        uploaded_after: params.uploaded_after,
        uploaded_before: params.uploaded_before,
        include_deleted: params.include_deleted,
        page: params.page.unwrap_or(1),
        page_size: params.page_size.unwrap_or(50),
    });
    Ok(json!({
        "records": result.records,
        "total": result.total,
        "total_pages": result.total_pages,
        "has_next": result.has_next,
        "has_prev": result.has_prev,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HashQuery {
    pub hash: Option<String>,
}

pub async fn metadata(
    State(state): State<SharedState>,
    Query(q): Query<HashQuery>,
) -> Result<Ok<FileRecord>, ApiError> {
    let hash_str = q.hash.ok_or_else(|| ApiError(AppError::Validation("hash query parameter is required".into())))?;
    let hash = parse_hash(&hash_str)?;
    let record = state
        .storage
        .index
        .get(&hash)
        .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))
        .map_err(ApiError)?;
    Ok(record)
}

pub async fn get_by_hash(
    State(state): State<SharedState>,
    Path(hash_str): Path<String>,
) -> Result<Ok<serde_json::Value>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    let record = state
        .storage
        .index
        .get(&hash)
        .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))
        .map_err(ApiError)?;
    Ok(json!({
        "record": record,
        "download_url": format!("/files/download?hash={hash}"),
        "stream_url": format!("/files/stream?hash={hash}"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LocateQuery {
    pub hash: Option<String>,
    pub path: Option<String>,
}

fn resolve_record(state: &SharedState, q: &LocateQuery) -> Result<FileRecord, AppError> {
    if let Some(hash_str) = &q.hash {
        let hash = ContentHash::from_str(hash_str)?;
        return state
            .storage
            .index
            .get(&hash)
            .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")));
    }
    if let Some(path) = &q.path {
        let hash = state
            .storage
            .index
            .hash_for_path(path)
            .ok_or_else(|| AppError::NotFound(format!("no record at path {path}")))?;
        return state
            .storage
            .index
            .get(&hash)
            .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")));
    }
    Err(AppError::Validation("either hash or path must be supplied".into()))
}

pub async fn download(
    State(state): State<SharedState>,
    Query(q): Query<LocateQuery>,
) -> Result<Response, ApiError> {
    let record = resolve_record(&state, &q).map_err(ApiError)?;
    let abs = state.storage.root().join(&record.stored_path);
    let bytes = tokio::fs::read(&abs).await.map_err(|e| ApiError(e.into()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", record.original_name))
            .unwrap_or(HeaderValue::from_static("attachment")),
    );
    Ok((headers, bytes).into_response())
}

struct ByteRange {
    start: u64,
    end: u64,
}

fn parse_range(spec: &str, size: u64) -> Result<ByteRange, AppError> {
    let spec = spec.strip_prefix("bytes=").ok_or(AppError::RangeNotSatisfiable { size })?;
    let (start_s, end_s) = spec.split_once('-').ok_or(AppError::RangeNotSatisfiable { size })?;

    let (start, end) = if start_s.is_empty() {
        let suffix: u64 = end_s.parse().map_err(|_| AppError::RangeNotSatisfiable { size })?;
        if suffix == 0 || suffix > size {
            return Err(AppError::RangeNotSatisfiable { size });
        }
        (size - suffix, size - 1)
    } else {
        let start: u64 = start_s.parse().map_err(|_| AppError::RangeNotSatisfiable { size })?;
        let end: u64 = if end_s.is_empty() {
            size.saturating_sub(1)
        } else {
            end_s.parse().map_err(|_| AppError::RangeNotSatisfiable { size })?
        };
        (start, end)
    };

    if start > end || end >= size || start >= size {
        return Err(AppError::RangeNotSatisfiable { size });
    }
    Ok(ByteRange { start, end })
}

pub async fn stream(
    State(state): State<SharedState>,
    Query(q): Query<LocateQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let record = resolve_record(&state, &q).map_err(ApiError)?;
    let abs = state.storage.root().join(&record.stored_path);
    let bytes = tokio::fs::read(&abs).await.map_err(|e| ApiError(e.into()))?;
    let size = bytes.len() as u64;

    let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        let mut resp_headers = HeaderMap::new();
        resp_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&record.mime_type).unwrap_or(HeaderValue::from_static("application/octet-stream")),
        );
        resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        return Ok((resp_headers, Body::from(bytes)).into_response());
    };

    let range = parse_range(range_header, size).map_err(ApiError)?;
    let slice = bytes[range.start as usize..=range.end as usize].to_vec();

    let mut resp_headers = HeaderMap::new();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    resp_headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {}-{}/{}", range.start, range.end, size)).unwrap(),
    );
    Ok((StatusCode::PARTIAL_CONTENT, resp_headers, Body::from(slice)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
    pub hash: String,
    pub new_name: String,
}

pub async fn rename(
    State(state): State<SharedState>,
    Json(body): Json<RenameBody>,
) -> Result<Ok<FileRecord>, ApiError> {
    let hash = parse_hash(&body.hash)?;
    let record = state.storage.rename(&hash, body.new_name).map_err(ApiError)?;
    Ok(record)
}

#[derive(Debug, Deserialize)]
pub struct MoveBody {
    pub category: Vec<String>,
}

pub async fn move_category(
    State(state): State<SharedState>,
    Path(hash_str): Path<String>,
    Json(body): Json<MoveBody>,
) -> Result<Ok<FileRecord>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    let record = state.storage.move_category(&hash, body.category).map_err(ApiError)?;
    Ok(record)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MetadataEditBody {
    Merge { data: BTreeMap<String, String> },
    Replace { data: BTreeMap<String, String> },
    Remove { keys: Vec<String> },
}

impl From<MetadataEditBody> for EditAction {
    fn from(body: MetadataEditBody) -> Self {
        match body {
            MetadataEditBody::Merge { data } => EditAction::Merge(data),
            MetadataEditBody::Replace { data } => EditAction::Replace(data),
            MetadataEditBody::Remove { keys } => EditAction::Remove(keys),
        }
    }
}

pub async fn edit_metadata(
    State(state): State<SharedState>,
    Path(hash_str): Path<String>,
    Json(body): Json<MetadataEditBody>,
) -> Result<Ok<BTreeMap<String, String>>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    let after = metadata_editor::apply_edit(&state.storage, &hash, body.into(), None, crate::middleware::request_id::current_request_id())
        .map_err(ApiError)?;
    Ok(after)
}

#[derive(Debug, Deserialize)]
pub struct BatchMetadataEntry {
    pub hash: String,
    #[serde(flatten)]
    pub action: MetadataEditBody,
}

#[derive(Debug, Deserialize)]
pub struct BatchMetadataBody {
    pub updates: Vec<BatchMetadataEntry>,
}

pub async fn batch_metadata(
    State(state): State<SharedState>,
    Json(body): Json<BatchMetadataBody>,
) -> Result<Ok<metadata_editor::BatchMetadataResult>, ApiError> {
    let mut updates = Vec::with_capacity(body.updates.len());
    for entry in body.updates {
        let hash = parse_hash(&entry.hash)?;
        updates.push(metadata_editor::BatchMetadataUpdate {
            hash,
            action: entry.action.into(),
        });
    }
    let result = metadata_editor::apply_batch(&state.storage, updates, None, crate::middleware::request_id::current_request_id())
        .map_err(ApiError)?;
    Ok(result)
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default = "default_true")]
    pub soft: bool,
}

fn default_true() -> bool {
    true
}

pub async fn delete(
    State(state): State<SharedState>,
    Path(hash_str): Path<String>,
    Query(q): Query<DeleteQuery>,
) -> Result<Ok<serde_json::Value>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    if q.soft {
        let record = state.storage.soft_delete(&hash).map_err(ApiError)?;
        Ok(json!({ "hash": record.hash, "soft": true }))
    } else {
        state
            .storage
            .hard_delete(&hash, crate::middleware::request_id::current_request_id())
            .map_err(ApiError)?;
        Ok(json!({ "hash": hash.to_string(), "soft": false }))
    }
}

pub async fn restore(
    State(state): State<SharedState>,
    Path(hash_str): Path<String>,
) -> Result<Ok<FileRecord>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    let record = state.storage.restore(&hash).map_err(ApiError)?;
    Ok(record)
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteBody {
    pub hashes: Vec<String>,
    #[serde(default)]
    pub hard: bool,
}

pub async fn batch_delete(
    State(state): State<SharedState>,
    Json(body): Json<BatchDeleteBody>,
) -> Result<Ok<rhinobox_core::storage::BatchDeleteReport>, ApiError> {
    let mut hashes = Vec::with_capacity(body.hashes.len());
    for h in body.hashes {
        hashes.push(parse_hash(&h)?);
    }
    Ok(state.storage.batch_delete(&hashes, body.hard))
}

#[derive(Debug, Deserialize)]
pub struct CopyBody {
    pub new_name: String,
    #[serde(default)]
    pub hard_link: bool,
}

pub async fn copy(
    State(state): State<SharedState>,
    Path(hash_str): Path<String>,
    Json(body): Json<CopyBody>,
) -> Result<Ok<FileRecord>, ApiError> {
    let hash = parse_hash(&hash_str)?;
    let record = state.storage.copy(&hash, body.new_name, body.hard_link).map_err(ApiError)?;
    Ok(record)
}

#[derive(Debug, Deserialize)]
pub struct BatchCopyEntry {
    pub hash: String,
    pub new_name: String,
    #[serde(default)]
    pub hard_link: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchCopyBody {
    pub copies: Vec<BatchCopyEntry>,
}

pub async fn batch_copy(
    State(state): State<SharedState>,
    Json(body): Json<BatchCopyBody>,
) -> Result<Ok<serde_json::Value>, ApiError> {
    let mut results = Vec::with_capacity(body.copies.len());
    for entry in body.copies {
        let outcome = parse_hash(&entry.hash)
            .map_err(|e| e.0)
            .and_then(|hash| state.storage.copy(&hash, entry.new_name.clone(), entry.hard_link));
        match outcome {
            Ok(record) => results.push(json!({ "success": true, "record": record })),
            Err(e) => results.push(json!({ "success": false, "new_name": entry.new_name, "error": e.to_string() })),
        }
    }
    Ok(json!({ "results": results }))
}
