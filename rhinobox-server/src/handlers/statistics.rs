use axum::extract::State;
use rhinobox_core::duplicates;
use serde_json::json;

use crate::app_state::SharedState;
use crate::envelope::Ok;

pub async fn statistics(State(state): State<SharedState>) -> Ok<serde_json::Value> {
    let records = state.storage.index.all();
    let total_files = records.iter().filter(|r| !r.is_deleted()).count();
    let deleted_files = records.iter().filter(|r| r.is_deleted()).count();
    let total_size: i64 = records.iter().filter(|r| !r.is_deleted()).map(|r| r.size).sum();
    let scan = duplicates::scan(&state.storage.index, false, false);

    Ok(json!({
        "total_files": total_files,
        "deleted_files": deleted_files,
        "total_size": total_size,
        "duplicate_groups": scan.duplicates_found,
        "storage_wasted": scan.storage_wasted,
        "routing_rules": state.storage.routing_rules.list().len(),
    }))
}
