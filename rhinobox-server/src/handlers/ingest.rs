use std::io::Cursor;

use axum::extract::{Multipart, State};
use axum::Json;
use rhinobox_core::error::AppError;
use rhinobox_core::storage::{IngestInput, IngestResult, UnrecognisedFormat};
use serde::Serialize;
use serde_json::Value;

use crate::app_state::SharedState;
use crate::envelope::Created;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct IngestedFile {
    pub hash: String,
    pub original_name: String,
    pub stored_path: String,
    pub category: String,
    pub mime_type: String,
    pub size: i64,
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub files: Vec<IngestedFile>,
    pub unrecognised_formats: Vec<UnrecognisedFormat>,
}

fn summarise(result: IngestResult, out: &mut IngestResponse) {
    out.files.push(IngestedFile {
        hash: result.record.hash.to_string(),
        original_name: result.record.original_name,
        stored_path: result.record.stored_path,
        category: result.record.category,
        mime_type: result.record.mime_type,
        size: result.record.size,
        duplicate: result.duplicate,
    });
    out.unrecognised_formats.extend(result.unrecognised_formats);
}

fn ingest_bytes(
    state: &SharedState,
    filename: String,
    mime_type: String,
    bytes: axum::body::Bytes,
) -> Result<IngestResult, AppError> {
    state.storage.ingest(IngestInput {
        filename,
        declared_mime_type: mime_type,
        reader: Cursor::new(bytes),
    })
}

/// `POST /ingest`: multipart, files and/or JSON-document parts mixed
/// freely. A part with no `file_name` is treated as a structured JSON
/// record and ingested under a synthesised `<field>.json` name.
pub async fn ingest(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Created<IngestResponse>, ApiError> {
    let mut out = IngestResponse {
        files: Vec::new(),
        unrecognised_formats: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?
    {
        let field_name = field.name().unwrap_or("file").to_string();
        let file_name = field.file_name().map(|s| s.to_string());
        let declared_mime = field.content_type().map(|s| s.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?;

        let (name, mime) = match file_name {
            Some(name) => {
                let mime = declared_mime.unwrap_or_else(|| mime_guess::from_path(&name).first_or_octet_stream().to_string());
                (name, mime)
            }
            None => (format!("{field_name}.json"), "application/json".to_string()),
        };

        let result = ingest_bytes(&state, name, mime, bytes).map_err(ApiError)?;
        summarise(result, &mut out);
    }

    Ok(Created(out))
}

/// `POST /ingest/media`: same admission pipeline, but every part must carry
/// a `file_name` (no bare JSON parts).
pub async fn ingest_media(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Created<IngestResponse>, ApiError> {
    let mut out = IngestResponse {
        files: Vec::new(),
        unrecognised_formats: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?
    {
        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError(AppError::Validation("every part of /ingest/media must carry a file_name".into())))?;
        let mime_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream().to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError(AppError::BadRequest(e.to_string())))?;

        let result = ingest_bytes(&state, file_name, mime_type, bytes).map_err(ApiError)?;
        summarise(result, &mut out);
    }

    Ok(Created(out))
}

/// `POST /ingest/json`: a single structured record, or an array of them.
pub async fn ingest_json(
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<Created<IngestResponse>, ApiError> {
    let records: Vec<Value> = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut out = IngestResponse {
        files: Vec::new(),
        unrecognised_formats: Vec::new(),
    };

    for (i, record) in records.into_iter().enumerate() {
        let name = record
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| format!("{s}.json"))
            .unwrap_or_else(|| format!("record-{i}.json"));
        let bytes = serde_json::to_vec(&record).map_err(|e| ApiError(AppError::internal(e)))?;
        let result = ingest_bytes(&state, name, "application/json".to_string(), bytes.into())
            .map_err(ApiError)?;
        summarise(result, &mut out);
    }

    Ok(Created(out))
}
