//! C6: Version Chain Manager. Per logical `FileID`, an ordered list of
//! `VersionEntry` with monotonic `version` and exactly one `is_current`.
//! Chains are persisted as one JSON document per id under
//! `<root>/metadata/versions/<id>.json`, written with the same
//! write-temp-then-rename discipline as the main index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::hash::ContentHash;
use crate::models::VersionEntry;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Chain {
    entries: Vec<VersionEntry>,
}

pub struct VersionChainManager {
    dir: PathBuf,
    // Per-chain lock: uploads on the same chain are serialised so the
    // observed version sequence is contiguous with no gaps.
    chain_locks: Mutex<std::collections::HashMap<String, std::sync::Arc<Mutex<()>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionDiff {
    pub size_delta: i64,
    pub time_between_secs: i64,
    pub hash_changed: bool,
    pub content_changed: bool,
}

impl VersionChainManager {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("metadata").join("versions"),
            chain_locks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn chain_path(&self, file_id: &str) -> PathBuf {
        self.dir.join(format!("{file_id}.json"))
    }

    fn lock_for(&self, file_id: &str) -> std::sync::Arc<Mutex<()>> {
        let mut guard = self.chain_locks.lock().unwrap();
        guard
            .entry(file_id.to_string())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }

    fn read(&self, file_id: &str) -> Result<Chain, AppError> {
        let path = self.chain_path(file_id);
        if !path.exists() {
            return Ok(Chain::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write(&self, file_id: &str, chain: &Chain) -> Result<(), AppError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(chain)?;
        let path = self.chain_path(file_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Newest-first listing.
    pub fn list(&self, file_id: &str) -> Result<Vec<VersionEntry>, AppError> {
        let mut entries = self.read(file_id)?.entries;
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(entries)
    }

    pub fn get(&self, file_id: &str, version: u64) -> Result<VersionEntry, AppError> {
        self.read(file_id)?
            .entries
            .into_iter()
            .find(|e| e.version == version)
            .ok_or_else(|| AppError::NotFound(format!("no version {version} in chain {file_id}")))
    }

    pub fn current(&self, file_id: &str) -> Result<VersionEntry, AppError> {
        self.read(file_id)?
            .entries
            .into_iter()
            .find(|e| e.is_current)
            .ok_or_else(|| AppError::NotFound(format!("chain {file_id} has no current version")))
    }

    fn append_version(
        &self,
        file_id: &str,
        hash: ContentHash,
        size: i64,
        uploaded_by: Option<String>,
        comment: Option<String>,
    ) -> Result<VersionEntry, AppError> {
        let lock = self.lock_for(file_id);
        let _guard = lock.lock().unwrap();

        let mut chain = self.read(file_id)?;
        let next_version = chain.entries.iter().map(|e| e.version).max().unwrap_or(0) + 1;
        for e in chain.entries.iter_mut() {
            e.is_current = false;
        }
        let entry = VersionEntry {
            version: next_version,
            hash,
            uploaded_at: Utc::now(),
            uploaded_by,
            comment,
            is_current: true,
            size,
        };
        chain.entries.push(entry.clone());
        self.write(file_id, &chain)?;
        Ok(entry)
    }

    /// Ingest already happened upstream (via `StorageManager::ingest`); this
    /// records the resulting hash as the next version in the chain.
    pub fn upload_new_version(
        &self,
        file_id: &str,
        hash: ContentHash,
        size: i64,
        uploaded_by: Option<String>,
        comment: Option<String>,
    ) -> Result<VersionEntry, AppError> {
        self.append_version(file_id, hash, size, uploaded_by, comment)
    }

    /// Produces a new entry whose hash equals an earlier version's hash.
    /// No bytes are copied or re-ingested.
    pub fn revert(&self, file_id: &str, to_version: u64) -> Result<VersionEntry, AppError> {
        let target = self.get(file_id, to_version)?;
        self.append_version(file_id, target.hash, target.size, None, Some(format!("revert to v{to_version}")))
    }

    pub fn diff(&self, file_id: &str, from: u64, to: u64) -> Result<VersionDiff, AppError> {
        let a = self.get(file_id, from)?;
        let b = self.get(file_id, to)?;
        Ok(VersionDiff {
            size_delta: b.size - a.size,
            time_between_secs: (b.uploaded_at - a.uploaded_at).num_seconds(),
            hash_changed: a.hash != b.hash,
            content_changed: a.hash != b.hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn h(seed: u8) -> ContentHash {
        crate::hash::hash_bytes(&[seed; 4])
    }

    #[test]
    fn versions_form_dense_prefix_with_one_current() {
        let dir = TempDir::new().unwrap();
        let mgr = VersionChainManager::new(dir.path());
        mgr.upload_new_version("f1", h(1), 10, None, None).unwrap();
        mgr.upload_new_version("f1", h(2), 20, None, None).unwrap();
        mgr.upload_new_version("f1", h(3), 30, None, None).unwrap();

        let entries = mgr.list("f1").unwrap();
        let mut versions: Vec<u64> = entries.iter().map(|e| e.version).collect();
        versions.sort();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(entries.iter().filter(|e| e.is_current).count(), 1);
        assert_eq!(mgr.current("f1").unwrap().version, 3);
    }

    #[test]
    fn revert_creates_new_version_pointing_at_old_hash() {
        let dir = TempDir::new().unwrap();
        let mgr = VersionChainManager::new(dir.path());
        let v1 = mgr.upload_new_version("f1", h(1), 10, None, None).unwrap();
        mgr.upload_new_version("f1", h(2), 20, None, None).unwrap();
        mgr.upload_new_version("f1", h(3), 30, None, None).unwrap();

        let reverted = mgr.revert("f1", 1).unwrap();
        assert_eq!(reverted.version, 4);
        assert_eq!(reverted.hash, v1.hash);
        assert!(reverted.is_current);

        let entries = mgr.list("f1").unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn diff_reports_structural_delta_without_reading_bytes() {
        let dir = TempDir::new().unwrap();
        let mgr = VersionChainManager::new(dir.path());
        mgr.upload_new_version("f1", h(1), 10, None, None).unwrap();
        mgr.upload_new_version("f1", h(2), 25, None, None).unwrap();

        let diff = mgr.diff("f1", 1, 2).unwrap();
        assert_eq!(diff.size_delta, 15);
        assert!(diff.hash_changed);
    }
}
