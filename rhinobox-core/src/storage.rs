//! C5: Storage Manager. Orchestrates C1 (temp writer), C2 (classifier via
//! C3), and C4 (index) into the admission protocol from spec.md §4.1, plus
//! rename/move/copy/delete.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use crate::audit::{AuditLog, DeleteLogEntry};
use crate::classifier::{self, UnrecognisedHint};
use crate::error::AppError;
use crate::hash::ContentHash;
use crate::index::MetadataIndex;
use crate::models::{AuditEntry, FileRecord};
use crate::routing::RoutingRuleStore;
use crate::temp::TempWriter;

pub struct IngestInput<R> {
    pub filename: String,
    pub declared_mime_type: String,
    pub reader: R,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnrecognisedFormat {
    pub filename: String,
    pub extension: Option<String>,
    pub suggestion: String,
}

pub struct IngestResult {
    pub record: FileRecord,
    pub duplicate: bool,
    pub unrecognised_formats: Vec<UnrecognisedFormat>,
}

pub struct StorageManager {
    root: PathBuf,
    pub index: MetadataIndex,
    pub routing_rules: RoutingRuleStore,
    pub audit: AuditLog,
    delete_log: AuditLog,
    // Per-hash locks serialise mutations on the same content hash (5.
    // Ordering guarantees); the process-wide index write lock inside
    // `MetadataIndex` already serialises persistence, this adds the
    // "single ingest proceeds to persist per hash" guarantee above it.
    hash_locks: Mutex<std::collections::HashMap<String, std::sync::Arc<Mutex<()>>>>,
}

impl StorageManager {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        fs::create_dir_all(root.join("storage"))?;
        fs::create_dir_all(root.join("metadata"))?;
        fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self {
            index: MetadataIndex::load(&root)?,
            routing_rules: RoutingRuleStore::load(&root)?,
            audit: AuditLog::new(&root, "audit_log.ndjson"),
            delete_log: AuditLog::new(&root, "delete_log.ndjson"),
            root,
            hash_locks: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for_hash(&self, hash: &str) -> std::sync::Arc<Mutex<()>> {
        let mut guard = self.hash_locks.lock().unwrap();
        guard
            .entry(hash.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }

    fn sanitise_name(name: &str) -> String {
        let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let cleaned: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            })
            .collect();
        if cleaned.is_empty() {
            "file".to_string()
        } else {
            cleaned
        }
    }

    fn full_storage_path(&self, category: &str, file_name: &str) -> PathBuf {
        self.root.join("storage").join(category).join(file_name)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Step 4 of the admission protocol: move the temp file into its final,
    /// content-addressed location. Idempotent: if the destination already
    /// exists (another ingest raced us to the same hash), the temp copy is
    /// simply discarded.
    fn place(&self, temp_path: &Path, category: &str, hash: &ContentHash, sanitised_name: &str) -> Result<String, AppError> {
        let dir = self.full_storage_path(category, "");
        fs::create_dir_all(&dir)?;
        let file_name = format!("{}_{}", hash.prefix(8), sanitised_name);
        let final_path = dir.join(&file_name);

        if final_path.exists() {
            fs::remove_file(temp_path).ok();
            return Ok(self.relative(&final_path));
        }

        match fs::rename(temp_path, &final_path) {
            Ok(()) => {}
            Err(_) => {
                // Cross-filesystem move: copy bytes then remove the temp.
                fs::copy(temp_path, &final_path)?;
                fs::remove_file(temp_path)?;
            }
        }
        Ok(self.relative(&final_path))
    }

    /// The full admission protocol (spec.md §4.1).
    pub fn ingest<R: std::io::Read>(&self, input: IngestInput<R>) -> Result<IngestResult, AppError> {
        let mut temp = TempWriter::new(&self.root)?;
        let (hash, size) = temp.write_from(input.reader)?;

        // Per-hash lock: at most one ingest of this hash proceeds past
        // this point to a persisted record; a lost race resolves as dedup.
        let lock = self.lock_for_hash(hash.as_str());
        let _hash_guard = lock.lock().unwrap();

        if let Some(existing) = self.index.get(&hash) {
            if existing.is_deleted() {
                let restored = self.index.update(&hash, |r| {
                    r.deleted_at = None;
                    Ok(())
                })?;
                return Ok(IngestResult {
                    record: restored,
                    duplicate: true,
                    unrecognised_formats: Vec::new(),
                });
            }
            return Ok(IngestResult {
                record: existing,
                duplicate: true,
                unrecognised_formats: Vec::new(),
            });
        }

        let sniffed = {
            let mut buf = Vec::new();
            if let Ok(bytes) = fs::read(temp.path()) {
                buf = bytes;
            }
            crate::classifier::sniff_mime(&buf[..buf.len().min(64)])
        };

        let (classification, hint) = classifier::classify(
            &self.routing_rules,
            &input.filename,
            &input.declared_mime_type,
            sniffed,
        );

        let sanitised = Self::sanitise_name(&input.filename);
        let stored_path = self.place(temp.path(), &classification.path(), &hash, &sanitised)?;
        temp.keep();

        let record = FileRecord {
            hash: hash.clone(),
            original_name: input.filename.clone(),
            stored_path,
            category: classification.path(),
            mime_type: input.declared_mime_type.clone(),
            size: size as i64,
            uploaded_at: Utc::now(),
            comment: None,
            metadata: BTreeMap::new(),
            deleted_at: None,
        };

        if let Err(e) = self.index.insert(record.clone()) {
            // Roll back: remove the bytes we just placed so we never leave
            // an orphaned file with no index entry.
            let abs = self.root.join(&record.stored_path);
            fs::remove_file(&abs).ok();
            return Err(e);
        }

        let unrecognised_formats = hint
            .map(|h: UnrecognisedHint| {
                vec![UnrecognisedFormat {
                    filename: h.filename,
                    extension: h.extension.clone(),
                    suggestion: h
                        .extension
                        .map(|e| format!("add a routing rule for {e}"))
                        .unwrap_or_else(|| "add a routing rule by mime_type".into()),
                }]
            })
            .unwrap_or_default();

        Ok(IngestResult {
            record,
            duplicate: false,
            unrecognised_formats,
        })
    }

    pub fn rename(&self, hash: &ContentHash, new_name: String) -> Result<FileRecord, AppError> {
        self.index.update(hash, |r| {
            r.original_name = new_name;
            Ok(())
        })
    }

    pub fn move_category(&self, hash: &ContentHash, new_category: Vec<String>) -> Result<FileRecord, AppError> {
        if new_category.iter().any(|seg| seg.contains("..")) {
            return Err(AppError::Validation("category must not contain '..'".into()));
        }
        let record = self
            .index
            .get(hash)
            .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;

        let category = new_category.join("/");
        let old_abs = self.root.join(&record.stored_path);
        let file_name = Path::new(&record.stored_path)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| record.hash.to_string());
        let new_dir = self.full_storage_path(&category, "");
        fs::create_dir_all(&new_dir)?;
        let new_abs = new_dir.join(&file_name);

        if old_abs != new_abs {
            match fs::rename(&old_abs, &new_abs) {
                Ok(()) => {}
                Err(_) => {
                    fs::copy(&old_abs, &new_abs)?;
                    fs::remove_file(&old_abs)?;
                }
            }
        }

        let new_path = self.relative(&new_abs);
        self.index.update(hash, |r| {
            r.category = category.clone();
            r.stored_path = new_path.clone();
            Ok(())
        })
    }

    pub fn copy(&self, hash: &ContentHash, new_name: String, hard_link: bool) -> Result<FileRecord, AppError> {
        let source = self
            .index
            .get(hash)
            .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;
        let source_abs = self.root.join(&source.stored_path);

        let sanitised = Self::sanitise_name(&new_name);
        let dir = self.full_storage_path(&source.category, "");
        fs::create_dir_all(&dir)?;
        let file_name = format!("{}_{}_copy_{}", hash.prefix(8), sanitised, uuid::Uuid::new_v4());
        let dest_abs = dir.join(&file_name);

        if hard_link {
            if fs::hard_link(&source_abs, &dest_abs).is_err() {
                fs::copy(&source_abs, &dest_abs)?;
            }
        } else {
            fs::copy(&source_abs, &dest_abs)?;
        }

        let record = FileRecord {
            hash: hash.clone(),
            original_name: new_name,
            stored_path: self.relative(&dest_abs),
            category: source.category.clone(),
            mime_type: source.mime_type.clone(),
            size: source.size,
            uploaded_at: Utc::now(),
            comment: None,
            metadata: BTreeMap::new(),
            deleted_at: None,
        };

        // Multiple logical records may share one hash (refcount-by-presence
        // in the index), so we cannot use `MetadataIndex::insert`'s
        // hash-uniqueness check here; instead we persist a second record
        // keyed by stored_path under the same hash via a dedicated path.
        self.insert_secondary_copy(record)
    }

    fn insert_secondary_copy(&self, record: FileRecord) -> Result<FileRecord, AppError> {
        self.index.insert_allow_duplicate_hash(record)
    }

    pub fn soft_delete(&self, hash: &ContentHash) -> Result<FileRecord, AppError> {
        self.index.update(hash, |r| {
            r.deleted_at = Some(Utc::now());
            Ok(())
        })
    }

    pub fn restore(&self, hash: &ContentHash) -> Result<FileRecord, AppError> {
        self.index.update(hash, |r| {
            r.deleted_at = None;
            Ok(())
        })
    }

    /// Hard delete. Per the Open Question resolution in SPEC_FULL.md: if
    /// another index record still points at the same stored path (a
    /// hard-link copy), refuse with `CONFLICT` rather than silently
    /// unlinking shared bytes out from under it.
    pub fn hard_delete(&self, hash: &ContentHash, request_id: Option<String>) -> Result<(), AppError> {
        let record = self
            .index
            .get(hash)
            .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;

        if self.index.count_records_at_path(&record.stored_path) > 1 {
            return Err(AppError::Conflict(
                "stored path is shared by another record (hard-link copy); refusing hard delete".into(),
            ));
        }

        let abs = self.root.join(&record.stored_path);
        match fs::remove_file(&abs) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.index.remove_by_path(&record.stored_path)?;
        self.delete_log.append_delete(&DeleteLogEntry {
            timestamp: Utc::now(),
            hash: hash.to_string(),
            stored_path: record.stored_path.clone(),
            hard: true,
            request_id,
        })?;
        Ok(())
    }

    pub fn batch_delete(&self, hashes: &[ContentHash], hard: bool) -> BatchDeleteReport {
        let mut total_deleted = 0u32;
        let mut total_failed = 0u32;
        let mut results = Vec::with_capacity(hashes.len());

        for hash in hashes {
            let outcome = if hard {
                self.hard_delete(hash, None)
            } else {
                self.soft_delete(hash).map(|_| ())
            };
            match outcome {
                Ok(()) => {
                    total_deleted += 1;
                    results.push(BatchItemResult {
                        hash: hash.to_string(),
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    total_failed += 1;
                    results.push(BatchItemResult {
                        hash: hash.to_string(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        BatchDeleteReport {
            total_deleted,
            total_failed,
            results,
        }
    }

    pub fn append_metadata_audit(&self, entry: AuditEntry) -> Result<(), AppError> {
        self.audit.append(&entry)
    }
}

#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    pub hash: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchDeleteReport {
    pub total_deleted: u32,
    pub total_failed: u32,
    pub results: Vec<BatchItemResult>,
}
