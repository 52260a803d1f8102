//! Append-only audit/deletion logs: one JSON object per line, O_APPEND
//! writes. Readers tolerate a truncated trailing line (crash mid-write).

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use crate::error::AppError;
use crate::models::AuditEntry;

pub struct AuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            path: root.join("metadata").join(file_name),
            lock: Mutex::new(()),
        }
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<(), AppError> {
        self.append_line(entry)
    }

    fn append_line<T: Serialize>(&self, entry: &T) -> Result<(), AppError> {
        let _guard = self.lock.lock().unwrap();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Reads all well-formed entries, skipping any line that fails to
    /// parse (a crash can leave a partial trailing line).
    pub fn read_all(&self) -> Result<Vec<AuditEntry>, AppError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => continue,
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteLogEntry {
    pub timestamp: chrono::DateTime<Utc>,
    pub hash: String,
    pub stored_path: String,
    pub hard: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AuditLog {
    pub fn append_delete(&self, entry: &DeleteLogEntry) -> Result<(), AppError> {
        self.append_line(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path(), "audit_log.ndjson");
        log.append(&AuditEntry {
            timestamp: Utc::now(),
            operation: "merge".into(),
            target_hash: "abc".into(),
            actor: None,
            before: serde_json::json!({}),
            after: serde_json::json!({"k":"v"}),
            request_id: Some("req-1".into()),
        })
        .unwrap();
        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "merge");
    }

    #[test]
    fn tolerates_truncated_trailing_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata").join("audit_log.ndjson");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{\"bad\n").unwrap();
        let log = AuditLog::new(dir.path(), "audit_log.ndjson");
        let entries = log.read_all().unwrap();
        assert!(entries.is_empty());
    }
}
