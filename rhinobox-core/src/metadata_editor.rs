//! C9: Metadata Editor. Schema-validated merge/replace/remove with
//! protected-field enforcement (I4) and an audit trail.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::json;

use crate::error::AppError;
use crate::hash::ContentHash;
use crate::models::{is_protected_key, AuditEntry};
use crate::storage::StorageManager;

const MAX_KEY_LEN: usize = 256;
const MAX_VALUE_BYTES: usize = 32 * 1024;
const MAX_ENTRIES: usize = 100;

fn key_pattern() -> Regex {
    Regex::new(r"^[A-Za-z0-9._-]+$").expect("static pattern")
}

pub enum EditAction {
    Merge(BTreeMap<String, String>),
    Replace(BTreeMap<String, String>),
    Remove(Vec<String>),
}

fn validate_key(re: &Regex, key: &str) -> Result<(), AppError> {
    if is_protected_key(key) {
        return Err(AppError::Validation(format!(
            "'{key}' is a protected metadata key and cannot be written or removed"
        )));
    }
    if key.len() > MAX_KEY_LEN || !re.is_match(key) {
        return Err(AppError::Validation(format!(
            "invalid metadata key '{key}': must match [A-Za-z0-9._-]+ and be <= {MAX_KEY_LEN} chars"
        )));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<(), AppError> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(AppError::Validation(format!(
            "metadata value for '{key}' exceeds {MAX_VALUE_BYTES} bytes"
        )));
    }
    Ok(())
}

pub fn apply_edit(
    storage: &StorageManager,
    hash: &ContentHash,
    action: EditAction,
    actor: Option<String>,
    request_id: Option<String>,
) -> Result<BTreeMap<String, String>, AppError> {
    let re = key_pattern();
    let before_record = storage
        .index
        .get(hash)
        .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;
    let before = before_record.metadata.clone();

    let after = match &action {
        EditAction::Merge(incoming) => {
            for (k, v) in incoming {
                validate_key(&re, k)?;
                validate_value(k, v)?;
            }
            let mut merged = before.clone();
            for (k, v) in incoming {
                merged.insert(k.clone(), v.clone());
            }
            merged
        }
        EditAction::Replace(incoming) => {
            for (k, v) in incoming {
                validate_key(&re, k)?;
                validate_value(k, v)?;
            }
            incoming.clone()
        }
        EditAction::Remove(keys) => {
            for k in keys {
                validate_key(&re, k)?;
            }
            let mut remaining = before.clone();
            for k in keys {
                remaining.remove(k);
            }
            remaining
        }
    };

    if after.len() > MAX_ENTRIES {
        return Err(AppError::Validation(format!(
            "metadata would contain {} entries, exceeding the limit of {MAX_ENTRIES}",
            after.len()
        )));
    }

    storage.index.update(hash, |r| {
        r.metadata = after.clone();
        Ok(())
    })?;

    storage.append_metadata_audit(AuditEntry {
        timestamp: chrono::Utc::now(),
        operation: match action {
            EditAction::Merge(_) => "merge".into(),
            EditAction::Replace(_) => "replace".into(),
            EditAction::Remove(_) => "remove".into(),
        },
        target_hash: hash.to_string(),
        actor,
        before: json!(before),
        after: json!(after),
        request_id,
    })?;

    Ok(after)
}

#[derive(Debug, serde::Serialize)]
pub struct BatchMetadataResult {
    pub success_count: u32,
    pub failure_count: u32,
    pub results: Vec<BatchMetadataItemResult>,
}

#[derive(Debug, serde::Serialize)]
pub struct BatchMetadataItemResult {
    pub hash: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct BatchMetadataUpdate {
    pub hash: ContentHash,
    pub action: EditAction,
}

/// Iterates over at most 100 updates; each is independent (partial
/// success).
pub fn apply_batch(
    storage: &StorageManager,
    updates: Vec<BatchMetadataUpdate>,
    actor: Option<String>,
    request_id: Option<String>,
) -> Result<BatchMetadataResult, AppError> {
    if updates.len() > 100 {
        return Err(AppError::Validation(
            "batch metadata update accepts at most 100 items".into(),
        ));
    }

    let mut success_count = 0;
    let mut failure_count = 0;
    let mut results = Vec::with_capacity(updates.len());

    for update in updates {
        let hash_str = update.hash.to_string();
        match apply_edit(storage, &update.hash, update.action, actor.clone(), request_id.clone()) {
            Ok(_) => {
                success_count += 1;
                results.push(BatchMetadataItemResult {
                    hash: hash_str,
                    success: true,
                    error: None,
                });
            }
            Err(e) => {
                failure_count += 1;
                results.push(BatchMetadataItemResult {
                    hash: hash_str,
                    success: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Ok(BatchMetadataResult {
        success_count,
        failure_count,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IngestInput, StorageManager};
    use tempfile::TempDir;

    fn manager() -> (TempDir, StorageManager) {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        (dir, mgr)
    }

    #[test]
    fn merge_unions_with_new_values_winning() {
        let (_dir, mgr) = manager();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"x"[..],
            })
            .unwrap();
        let mut first = BTreeMap::new();
        first.insert("tag".into(), "a".into());
        apply_edit(&mgr, &r.record.hash, EditAction::Merge(first), None, None).unwrap();

        let mut second = BTreeMap::new();
        second.insert("tag".into(), "b".into());
        second.insert("owner".into(), "carl".into());
        let after = apply_edit(&mgr, &r.record.hash, EditAction::Merge(second), None, None).unwrap();

        assert_eq!(after.get("tag"), Some(&"b".to_string()));
        assert_eq!(after.get("owner"), Some(&"carl".to_string()));
    }

    #[test]
    fn protected_key_write_is_rejected() {
        let (_dir, mgr) = manager();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"x"[..],
            })
            .unwrap();
        let mut bad = BTreeMap::new();
        bad.insert("hash".into(), "evil".into());
        let err = apply_edit(&mgr, &r.record.hash, EditAction::Merge(bad), None, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn every_mutation_has_an_audit_line() {
        let (_dir, mgr) = manager();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"x"[..],
            })
            .unwrap();
        let mut m = BTreeMap::new();
        m.insert("k".into(), "v".into());
        apply_edit(&mgr, &r.record.hash, EditAction::Merge(m), None, Some("req-1".into())).unwrap();

        let entries = mgr.audit.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn remove_deletes_listed_keys_only() {
        let (_dir, mgr) = manager();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"x"[..],
            })
            .unwrap();
        let mut m = BTreeMap::new();
        m.insert("a".into(), "1".into());
        m.insert("b".into(), "2".into());
        apply_edit(&mgr, &r.record.hash, EditAction::Merge(m), None, None).unwrap();

        let after = apply_edit(
            &mgr,
            &r.record.hash,
            EditAction::Remove(vec!["a".into()]),
            None,
            None,
        )
        .unwrap();
        assert_eq!(after.len(), 1);
        assert!(after.contains_key("b"));
    }

    #[test]
    fn batch_update_reports_partial_success() {
        let (_dir, mgr) = manager();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"x"[..],
            })
            .unwrap();
        let bogus = crate::hash::hash_bytes(b"missing");

        let mut ok_map = BTreeMap::new();
        ok_map.insert("k".into(), "v".into());
        let updates = vec![
            BatchMetadataUpdate {
                hash: r.record.hash.clone(),
                action: EditAction::Merge(ok_map),
            },
            BatchMetadataUpdate {
                hash: bogus,
                action: EditAction::Merge(BTreeMap::new()),
            },
        ];
        let result = apply_batch(&mgr, updates, None, None).unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
    }
}
