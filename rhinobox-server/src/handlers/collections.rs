use std::collections::BTreeMap;

use axum::extract::{Path, State};
use serde::Serialize;
use serde_json::json;

use crate::app_state::SharedState;
use crate::envelope::Ok;

#[derive(Debug, Default, Serialize)]
struct CategoryStats {
    file_count: u64,
    total_size: i64,
}

pub async fn list(State(state): State<SharedState>) -> Ok<serde_json::Value> {
    let mut by_top: BTreeMap<String, CategoryStats> = BTreeMap::new();
    for record in state.storage.index.all() {
        if record.is_deleted() {
            continue;
        }
        let top = record.category.split('/').next().unwrap_or("other").to_string();
        let entry = by_top.entry(top).or_default();
        entry.file_count += 1;
        entry.total_size += record.size;
    }
    Ok(json!({ "collections": by_top }))
}

pub async fn stats(State(state): State<SharedState>, Path(category_type): Path<String>) -> Ok<serde_json::Value> {
    let mut stats = CategoryStats::default();
    for record in state.storage.index.all() {
        if record.is_deleted() || !record.category.starts_with(&category_type) {
            continue;
        }
        stats.file_count += 1;
        stats.total_size += record.size;
    }
    Ok(json!({ "category": category_type, "stats": stats }))
}
