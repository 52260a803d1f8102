//! C4: Metadata Index. An ordered sequence of `FileRecord`s backing a
//! `hash -> record` map, with a secondary `stored_path -> hash` index for
//! the verify pass (4.7). Readers take a cheap `Arc` snapshot so a
//! long-running scan never blocks ingestion; writers are serialised by a
//! single process-wide lock, matching the teacher's single-writer
//! `atomic_write` discipline in `helix-protocol/src/storage.rs`, applied
//! here to the index document instead of individual objects.
//!
//! C8 (Search & Query Surface) is implemented here too: it is nothing more
//! than filtered queries over this index.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::hash::ContentHash;
use crate::models::FileRecord;

struct Snapshot {
    records: Vec<FileRecord>,
    by_hash: HashMap<ContentHash, usize>,
    by_path: HashMap<String, ContentHash>,
}

impl Snapshot {
    fn build(mut records: Vec<FileRecord>) -> Self {
        records.sort_by_key(|r| r.uploaded_at);
        let mut by_hash = HashMap::with_capacity(records.len());
        let mut by_path = HashMap::with_capacity(records.len());
        for (i, r) in records.iter().enumerate() {
            by_hash.insert(r.hash.clone(), i);
            by_path.insert(r.stored_path.clone(), r.hash.clone());
        }
        Self {
            records,
            by_hash,
            by_path,
        }
    }
}

pub struct MetadataIndex {
    path: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize)]
struct PersistedRecords(Vec<FileRecord>);

impl MetadataIndex {
    pub fn load(root: &Path) -> Result<Self, AppError> {
        let path = root.join("metadata").join("files.json");
        let records = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let PersistedRecords(records) = serde_json::from_str(&raw)?;
            records
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(Snapshot::build(records))),
            write_lock: Mutex::new(()),
        })
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap().clone()
    }

    fn persist(&self, records: &[FileRecord]) -> Result<(), AppError> {
        let body = serde_json::to_vec_pretty(&PersistedRecords(records.to_vec()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Applies `mutate` to a fresh copy of the record set under the
    /// process-wide write lock, persists it, then swaps in the new
    /// snapshot. If `mutate` errors, or persistence fails, the in-memory
    /// state is left untouched — no partial update is ever visible.
    fn with_write<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<FileRecord>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut records = self.snapshot().records.clone();
        let result = mutate(&mut records)?;
        self.persist(&records)?;
        *self.snapshot.write().unwrap() = Arc::new(Snapshot::build(records));
        Ok(result)
    }

    pub fn get(&self, hash: &ContentHash) -> Option<FileRecord> {
        let snap = self.snapshot();
        snap.by_hash.get(hash).map(|&i| snap.records[i].clone())
    }

    pub fn hash_for_path(&self, stored_path: &str) -> Option<ContentHash> {
        self.snapshot().by_path.get(stored_path).cloned()
    }

    pub fn all(&self) -> Vec<FileRecord> {
        self.snapshot().records.clone()
    }

    pub fn insert(&self, record: FileRecord) -> Result<(), AppError> {
        self.with_write(|records| {
            if records.iter().any(|r| r.hash == record.hash) {
                return Err(AppError::Conflict(format!(
                    "hash {} already present in index",
                    record.hash
                )));
            }
            records.push(record);
            Ok(())
        })
    }

    /// Like [`MetadataIndex::insert`] but permits another record to already
    /// hold the same hash (two logical records, one blob — the copy/
    /// hard-link case). Still rejects a colliding `stored_path`.
    pub fn insert_allow_duplicate_hash(&self, record: FileRecord) -> Result<FileRecord, AppError> {
        self.with_write(|records| {
            if records.iter().any(|r| r.stored_path == record.stored_path) {
                return Err(AppError::Conflict(format!(
                    "stored_path {} already present in index",
                    record.stored_path
                )));
            }
            records.push(record.clone());
            Ok(record)
        })
    }

    pub fn update<F>(&self, hash: &ContentHash, f: F) -> Result<FileRecord, AppError>
    where
        F: FnOnce(&mut FileRecord) -> Result<(), AppError>,
    {
        self.with_write(|records| {
            let rec = records
                .iter_mut()
                .find(|r| &r.hash == hash)
                .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;
            f(rec)?;
            Ok(rec.clone())
        })
    }

    /// Removes the record at an exact `stored_path`. Used wherever a
    /// specific copy must be targeted among several records sharing one
    /// hash (hard-link copies violate hash-as-sole-key).
    pub fn remove_by_path(&self, stored_path: &str) -> Result<FileRecord, AppError> {
        self.with_write(|records| {
            let pos = records
                .iter()
                .position(|r| r.stored_path == stored_path)
                .ok_or_else(|| AppError::NotFound(format!("no record at {stored_path}")))?;
            Ok(records.remove(pos))
        })
    }

    pub fn remove(&self, hash: &ContentHash) -> Result<FileRecord, AppError> {
        self.with_write(|records| {
            let pos = records
                .iter()
                .position(|r| &r.hash == hash)
                .ok_or_else(|| AppError::NotFound(format!("no record for hash {hash}")))?;
            Ok(records.remove(pos))
        })
    }

    pub fn count_records_at_path(&self, stored_path: &str) -> usize {
        self.snapshot()
            .records
            .iter()
            .filter(|r| r.stored_path == stored_path)
            .count()
    }
}

#[derive(Debug, Default, Clone)]
pub struct SearchQuery {
    pub hash: Option<ContentHash>,
    pub name_contains: Option<String>,
    pub extension: Option<String>,
    pub mime_prefix: Option<String>,
    pub category_prefix: Option<String>,
    pub uploaded_after: Option<DateTime<Utc>>,
    pub uploaded_before: Option<DateTime<Utc>>,
    pub include_deleted: bool,
    pub page: u32,
    pub page_size: u32,
}

impl SearchQuery {
    pub fn normalised(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        self.page_size = self.page_size.clamp(1, 500);
        self
    }
}

pub struct SearchResult {
    pub records: Vec<FileRecord>,
    pub total: usize,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl MetadataIndex {
    /// C8: filtered, paginated listing over the index.
    pub fn search(&self, query: SearchQuery) -> SearchResult {
        let query = query.normalised();
        let snap = self.snapshot();

        let mut matches: Vec<&FileRecord> = snap
            .records
            .iter()
            .filter(|r| query.include_deleted || !r.is_deleted())
            .filter(|r| query.hash.as_ref().map_or(true, |h| &r.hash == h))
            .filter(|r| {
                query
                    .name_contains
                    .as_ref()
                    .map_or(true, |n| r.original_name.to_lowercase().contains(&n.to_lowercase()))
            })
            .filter(|r| {
                query.extension.as_ref().map_or(true, |ext| {
                    r.extension()
                        .map(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
                        .unwrap_or(false)
                })
            })
            .filter(|r| {
                query
                    .mime_prefix
                    .as_ref()
                    .map_or(true, |p| r.mime_type.starts_with(p.as_str()))
            })
            .filter(|r| {
                query
                    .category_prefix
                    .as_ref()
                    .map_or(true, |p| r.category.starts_with(p.as_str()))
            })
            .filter(|r| query.uploaded_after.map_or(true, |t| r.uploaded_at >= t))
            .filter(|r| query.uploaded_before.map_or(true, |t| r.uploaded_at <= t))
            .collect();

        matches.sort_by_key(|r| r.uploaded_at);

        let total = matches.len();
        let page_size = query.page_size as usize;
        let total_pages = ((total + page_size - 1) / page_size).max(1) as u32;
        let start = ((query.page - 1) as usize) * page_size;
        let page_records: Vec<FileRecord> = matches
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();

        SearchResult {
            records: page_records,
            total,
            total_pages,
            has_next: query.page < total_pages,
            has_prev: query.page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn rec(name: &str, hash: &str) -> FileRecord {
        FileRecord {
            hash: ContentHash::from_str(hash).unwrap(),
            original_name: name.into(),
            stored_path: format!("storage/documents/txt/{hash}_{name}"),
            category: "documents/txt".into(),
            mime_type: "text/plain".into(),
            size: 12,
            uploaded_at: Utc::now(),
            comment: None,
            metadata: BTreeMap::new(),
            deleted_at: None,
        }
    }

    fn hash64(seed: u8) -> String {
        format!("{:02x}", seed).repeat(32)
    }

    #[test]
    fn insert_get_and_persist_round_trip() {
        let dir = TempDir::new().unwrap();
        let idx = MetadataIndex::load(dir.path()).unwrap();
        let h = hash64(1);
        idx.insert(rec("a.txt", &h)).unwrap();
        assert!(idx.get(&ContentHash::from_str(&h).unwrap()).is_some());

        let reloaded = MetadataIndex::load(dir.path()).unwrap();
        assert_eq!(reloaded.all().len(), 1);
    }

    #[test]
    fn duplicate_hash_insert_is_conflict() {
        let dir = TempDir::new().unwrap();
        let idx = MetadataIndex::load(dir.path()).unwrap();
        let h = hash64(2);
        idx.insert(rec("a.txt", &h)).unwrap();
        let err = idx.insert(rec("b.txt", &h)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn search_filters_by_name_and_paginates() {
        let dir = TempDir::new().unwrap();
        let idx = MetadataIndex::load(dir.path()).unwrap();
        idx.insert(rec("alpha.txt", &hash64(3))).unwrap();
        idx.insert(rec("beta.txt", &hash64(4))).unwrap();

        let res = idx.search(SearchQuery {
            name_contains: Some("alp".into()),
            page: 1,
            page_size: 10,
            ..Default::default()
        });
        assert_eq!(res.total, 1);
        assert_eq!(res.records[0].original_name, "alpha.txt");
    }

    #[test]
    fn search_excludes_deleted_by_default() {
        let dir = TempDir::new().unwrap();
        let idx = MetadataIndex::load(dir.path()).unwrap();
        let h = hash64(5);
        idx.insert(rec("x.txt", &h)).unwrap();
        idx.update(&ContentHash::from_str(&h).unwrap(), |r| {
            r.deleted_at = Some(Utc::now());
            Ok(())
        })
        .unwrap();

        let res = idx.search(SearchQuery::default());
        assert_eq!(res.total, 0);

        let res_incl = idx.search(SearchQuery {
            include_deleted: true,
            ..Default::default()
        });
        assert_eq!(res_incl.total, 1);
    }

    #[test]
    fn resave_is_byte_identical_when_unchanged() {
        let dir = TempDir::new().unwrap();
        let idx = MetadataIndex::load(dir.path()).unwrap();
        idx.insert(rec("a.txt", &hash64(6))).unwrap();
        let path = dir.path().join("metadata").join("files.json");
        let first = fs::read(&path).unwrap();

        idx.persist(&idx.all()).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }
}
