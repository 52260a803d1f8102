//! C7: Duplicate / Verify Engine. Groups by hash, walks the storage tree
//! for reconciliation (I5), and merges duplicate groups down to one kept
//! file.

use std::collections::HashMap;
use std::fs;

use serde::Serialize;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::audit::{AuditLog, DeleteLogEntry};
use crate::error::AppError;
use crate::hash::{hash_bytes, ContentHash};
use crate::index::MetadataIndex;
use crate::models::{DuplicateGroup, FileRecord};
use crate::storage::StorageManager;

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub total_files: usize,
    pub duplicates_found: usize,
    pub storage_wasted: i64,
    pub groups: Vec<DuplicateGroup>,
}

pub fn scan(index: &MetadataIndex, include_deleted: bool, include_metadata: bool) -> ScanReport {
    let records: Vec<FileRecord> = index
        .all()
        .into_iter()
        .filter(|r| include_deleted || !r.is_deleted())
        .collect();

    let mut by_hash: HashMap<ContentHash, Vec<FileRecord>> = HashMap::new();
    for r in &records {
        by_hash.entry(r.hash.clone()).or_default().push(r.clone());
    }

    let mut groups = Vec::new();
    let mut storage_wasted = 0i64;
    for (hash, files) in by_hash {
        if files.len() < 2 {
            continue;
        }
        let size = files[0].size;
        let wasted = size * (files.len() as i64 - 1);
        storage_wasted += wasted;
        groups.push(DuplicateGroup {
            hash,
            size,
            files: if include_metadata { files } else { Vec::new() },
            wasted_bytes: wasted,
        });
    }

    ScanReport {
        scan_id: Uuid::new_v4().to_string(),
        total_files: records.len(),
        duplicates_found: groups.len(),
        storage_wasted,
        groups,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifyIssue {
    OrphanedFile { path: String, message: String },
    MissingFile { path: String, hash: String, message: String },
    HashMismatch { path: String, hash: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub total_issues: usize,
    pub issues: Vec<VerifyIssue>,
}

/// Walks `<root>/storage/**`, ignoring `.tmp/`, reconciling against the
/// index via the reverse `stored_path -> hash` lookup (4.4).
pub fn verify(root: &std::path::Path, index: &MetadataIndex, deep: bool) -> Result<VerifyReport, AppError> {
    let storage_root = root.join("storage");
    let mut issues = Vec::new();
    let mut seen_paths = std::collections::HashSet::new();

    if storage_root.exists() {
        for entry in WalkDir::new(&storage_root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.components().any(|c| c.as_os_str() == ".tmp") {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            seen_paths.insert(rel.clone());

            match index.hash_for_path(&rel) {
                None => {
                    issues.push(VerifyIssue::OrphanedFile {
                        path: rel.clone(),
                        message: "file on disk has no matching index entry".into(),
                    });
                }
                Some(expected_hash) => {
                    if deep {
                        let bytes = fs::read(path)?;
                        let actual = hash_bytes(&bytes);
                        if actual != expected_hash {
                            issues.push(VerifyIssue::HashMismatch {
                                path: rel.clone(),
                                hash: expected_hash.to_string(),
                                message: format!(
                                    "recorded hash {expected_hash} does not match on-disk content (got {actual})"
                                ),
                            });
                        }
                    }
                }
            }
        }
    }

    for record in index.all() {
        if !seen_paths.contains(&record.stored_path) {
            let abs = root.join(&record.stored_path);
            if !abs.exists() {
                issues.push(VerifyIssue::MissingFile {
                    path: record.stored_path.clone(),
                    hash: record.hash.to_string(),
                    message: "index entry has no corresponding file on disk".into(),
                });
            }
        }
    }

    Ok(VerifyReport {
        total_issues: issues.len(),
        issues,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct MergePlan {
    pub kept_file: String,
    pub removed_files: Vec<String>,
    pub space_reclaimed: i64,
}

/// Removes duplicate physical files within a hash's group, keeping
/// `keep_path`. `remove_others=false` returns a dry-run plan only.
pub fn merge(
    storage: &StorageManager,
    hash: &ContentHash,
    keep_path: &str,
    remove_others: bool,
    request_id: Option<String>,
) -> Result<MergePlan, AppError> {
    let group: Vec<FileRecord> = storage
        .index
        .all()
        .into_iter()
        .filter(|r| &r.hash == hash)
        .collect();

    if !group.iter().any(|r| r.stored_path == keep_path) {
        return Err(AppError::Validation(format!(
            "keep path {keep_path} is not a member of the duplicate group for hash {hash}"
        )));
    }

    let to_remove: Vec<FileRecord> = group
        .into_iter()
        .filter(|r| r.stored_path != keep_path)
        .collect();

    let mut removed_files = Vec::new();
    let mut space_reclaimed = 0i64;

    if remove_others {
        for r in &to_remove {
            let abs = storage.root().join(&r.stored_path);
            match fs::remove_file(&abs) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            // Remove by stored_path, not by hash: a duplicate group shares
            // one hash across several records, and `MetadataIndex::remove`
            // keys on hash alone, which would risk deleting the kept record.
            remove_by_stored_path(storage, &r.stored_path)?;
            AuditLog::new(storage.root(), "delete_log.ndjson").append_delete(&DeleteLogEntry {
                timestamp: chrono::Utc::now(),
                hash: r.hash.to_string(),
                stored_path: r.stored_path.clone(),
                hard: true,
                request_id: request_id.clone(),
            })?;
            removed_files.push(r.stored_path.clone());
            space_reclaimed += r.size;
        }
    } else {
        removed_files = to_remove.iter().map(|r| r.stored_path.clone()).collect();
        space_reclaimed = to_remove.iter().map(|r| r.size).sum();
    }

    Ok(MergePlan {
        kept_file: keep_path.to_string(),
        removed_files,
        space_reclaimed,
    })
}

fn remove_by_stored_path(storage: &StorageManager, stored_path: &str) -> Result<FileRecord, AppError> {
    storage.index.remove_by_path(stored_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IngestInput, StorageManager};
    use tempfile::TempDir;

    #[test]
    fn scan_finds_no_groups_when_deduped() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        mgr.ingest(IngestInput {
            filename: "a.txt".into(),
            declared_mime_type: "text/plain".into(),
            reader: &b"hello world\n"[..],
        })
        .unwrap();
        mgr.ingest(IngestInput {
            filename: "b.txt".into(),
            declared_mime_type: "text/plain".into(),
            reader: &b"hello world\n"[..],
        })
        .unwrap();

        let report = scan(&mgr.index, false, true);
        assert_eq!(report.duplicates_found, 0);
    }

    #[test]
    fn scan_finds_group_for_hard_link_copies() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"shared"[..],
            })
            .unwrap();
        mgr.copy(&r.record.hash, "a-copy.txt".into(), true).unwrap();

        let report = scan(&mgr.index, false, true);
        assert_eq!(report.duplicates_found, 1);
        assert_eq!(report.groups[0].wasted_bytes, r.record.size);
    }

    #[test]
    fn verify_detects_tamper_via_deep_scan() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        let r = mgr
            .ingest(IngestInput {
                filename: "x.bin".into(),
                declared_mime_type: "application/octet-stream".into(),
                reader: &b"original"[..],
            })
            .unwrap();
        let abs = dir.path().join(&r.record.stored_path);
        fs::write(&abs, b"tampered!").unwrap();

        let report = verify(dir.path(), &mgr.index, true).unwrap();
        assert_eq!(report.total_issues, 1);
        assert!(matches!(report.issues[0], VerifyIssue::HashMismatch { .. }));
        assert_eq!(mgr.index.all().len(), 1);
    }

    #[test]
    fn verify_is_clean_when_consistent() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        mgr.ingest(IngestInput {
            filename: "a.txt".into(),
            declared_mime_type: "text/plain".into(),
            reader: &b"hello"[..],
        })
        .unwrap();
        let report = verify(dir.path(), &mgr.index, true).unwrap();
        assert_eq!(report.total_issues, 0);
    }

    #[test]
    fn merge_dry_run_does_not_remove_files() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"shared"[..],
            })
            .unwrap();
        let copy = mgr.copy(&r.record.hash, "a-copy.txt".into(), false).unwrap();

        let plan = merge(&mgr, &r.record.hash, &r.record.stored_path, false, None).unwrap();
        assert_eq!(plan.removed_files, vec![copy.stored_path.clone()]);
        assert!(dir.path().join(&copy.stored_path).exists());
    }

    #[test]
    fn merge_rejects_keep_path_outside_group() {
        let dir = TempDir::new().unwrap();
        let mgr = StorageManager::open(dir.path()).unwrap();
        let r = mgr
            .ingest(IngestInput {
                filename: "a.txt".into(),
                declared_mime_type: "text/plain".into(),
                reader: &b"shared"[..],
            })
            .unwrap();
        let err = merge(&mgr, &r.record.hash, "storage/bogus/path", false, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
