//! Data model types shared across components, per spec.md §3.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// Metadata keys the user-controlled map may never contain (I4). This is
/// the single source referenced by both schema validation and core
/// business validation — never duplicate this list elsewhere.
pub const PROTECTED_KEYS: &[&str] = &[
    "hash",
    "original_name",
    "stored_path",
    "mime_type",
    "size",
    "uploaded_at",
    "category",
];

pub fn is_protected_key(key: &str) -> bool {
    PROTECTED_KEYS.contains(&key)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: ContentHash,
    pub original_name: String,
    pub stored_path: String,
    pub category: String,
    pub mime_type: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn extension(&self) -> Option<&str> {
        self.original_name.rsplit_once('.').map(|(_, ext)| ext)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub destination: Vec<String>,
    pub usage_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RoutingRule {
    pub fn identity(&self) -> (Option<String>, Option<String>) {
        (self.extension.clone(), self.mime_type.clone())
    }

    pub fn destination_category(&self) -> String {
        self.destination.join("/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u64,
    pub hash: ContentHash,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub is_current: bool,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub hash: ContentHash,
    pub size: i64,
    pub files: Vec<FileRecord>,
    pub wasted_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub target_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
