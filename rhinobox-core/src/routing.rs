//! C3: Routing Rule Store. A small, frequently-read, rarely-written table
//! persisted as a single JSON document, written atomically the same way the
//! teacher writes objects in `helix-protocol/src/storage.rs`
//! (write-temp-then-rename).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::RoutingRule;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RulesDocument {
    rules: Vec<RoutingRule>,
}

pub struct RoutingRuleStore {
    path: PathBuf,
    rules: RwLock<Vec<RoutingRule>>,
}

impl RoutingRuleStore {
    pub fn load(root: &Path) -> Result<Self, AppError> {
        let path = root.join("metadata").join("routing_rules.json");
        let rules = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let doc: RulesDocument = serde_json::from_str(&raw)?;
            doc.rules
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            rules: RwLock::new(rules),
        })
    }

    fn persist(&self, rules: &[RoutingRule]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = RulesDocument {
            rules: rules.to_vec(),
        };
        let body = serde_json::to_vec_pretty(&doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<RoutingRule> {
        self.rules.read().unwrap().clone()
    }

    fn identity_of(extension: &Option<String>, mime_type: &Option<String>) -> (Option<String>, Option<String>) {
        (
            extension.as_ref().map(|s| s.to_lowercase()),
            mime_type.as_ref().map(|s| s.to_lowercase()),
        )
    }

    pub fn add(
        &self,
        extension: Option<String>,
        mime_type: Option<String>,
        destination: Vec<String>,
    ) -> Result<RoutingRule, AppError> {
        if destination.is_empty() {
            return Err(AppError::Validation(
                "routing rule destination must not be empty".into(),
            ));
        }
        if extension.is_none() && mime_type.is_none() {
            return Err(AppError::Validation(
                "routing rule must specify an extension or a mime_type".into(),
            ));
        }
        let mut guard = self.rules.write().unwrap();
        let wanted = Self::identity_of(&extension, &mime_type);
        if guard
            .iter()
            .any(|r| Self::identity_of(&r.extension, &r.mime_type) == wanted)
        {
            return Err(AppError::Conflict(
                "a routing rule with this extension/mime_type already exists".into(),
            ));
        }
        let rule = RoutingRule {
            extension,
            mime_type,
            destination,
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };
        guard.push(rule.clone());
        self.persist(&guard)?;
        Ok(rule)
    }

    pub fn update(
        &self,
        extension: Option<String>,
        mime_type: Option<String>,
        destination: Vec<String>,
    ) -> Result<RoutingRule, AppError> {
        if destination.is_empty() {
            return Err(AppError::Validation(
                "routing rule destination must not be empty".into(),
            ));
        }
        let mut guard = self.rules.write().unwrap();
        let wanted = Self::identity_of(&extension, &mime_type);
        let rule = guard
            .iter_mut()
            .find(|r| Self::identity_of(&r.extension, &r.mime_type) == wanted)
            .ok_or_else(|| AppError::NotFound("no routing rule with that identity".into()))?;
        rule.destination = destination;
        let updated = rule.clone();
        self.persist(&guard)?;
        Ok(updated)
    }

    pub fn remove(
        &self,
        extension: Option<String>,
        mime_type: Option<String>,
    ) -> Result<(), AppError> {
        let mut guard = self.rules.write().unwrap();
        let wanted = Self::identity_of(&extension, &mime_type);
        let before = guard.len();
        guard.retain(|r| Self::identity_of(&r.extension, &r.mime_type) != wanted);
        if guard.len() == before {
            return Err(AppError::NotFound("no routing rule with that identity".into()));
        }
        self.persist(&guard)?;
        Ok(())
    }

    /// First-match lookup: exact extension, then exact mime. Bumps usage on
    /// a hit. Returns `None` when no learned rule applies.
    pub fn match_and_bump(&self, extension: Option<&str>, mime_type: Option<&str>) -> Option<RoutingRule> {
        let mut guard = self.rules.write().unwrap();

        if let Some(ext) = extension {
            let ext = ext.to_lowercase();
            if let Some(rule) = guard
                .iter_mut()
                .find(|r| r.extension.as_deref().map(|e| e.to_lowercase()) == Some(ext.clone()))
            {
                rule.usage_count += 1;
                rule.last_used_at = Some(Utc::now());
                let hit = rule.clone();
                self.persist(&guard).ok();
                return Some(hit);
            }
        }

        if let Some(mime) = mime_type {
            let mime = mime.to_lowercase();
            if let Some(rule) = guard
                .iter_mut()
                .find(|r| r.mime_type.as_deref().map(|m| m.to_lowercase()) == Some(mime.clone()))
            {
                rule.usage_count += 1;
                rule.last_used_at = Some(Utc::now());
                let hit = rule.clone();
                self.persist(&guard).ok();
                return Some(hit);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_reject_empty_destination() {
        let dir = TempDir::new().unwrap();
        let store = RoutingRuleStore::load(dir.path()).unwrap();
        let err = store
            .add(Some(".blend".into()), None, vec![])
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn add_reject_both_keys_empty() {
        let dir = TempDir::new().unwrap();
        let store = RoutingRuleStore::load(dir.path()).unwrap();
        let err = store.add(None, None, vec!["x".into()]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn learned_rule_matches_and_bumps_usage() {
        let dir = TempDir::new().unwrap();
        let store = RoutingRuleStore::load(dir.path()).unwrap();
        store
            .add(Some(".blend".into()), None, vec!["3d".into(), "blender".into()])
            .unwrap();

        let hit = store.match_and_bump(Some(".blend"), None).unwrap();
        assert_eq!(hit.destination_category(), "3d/blender");
        assert_eq!(hit.usage_count, 1);

        let hit2 = store.match_and_bump(Some(".BLEND"), None).unwrap();
        assert_eq!(hit2.usage_count, 2);
    }

    #[test]
    fn persists_across_reloads() {
        let dir = TempDir::new().unwrap();
        {
            let store = RoutingRuleStore::load(dir.path()).unwrap();
            store.add(Some(".blend".into()), None, vec!["3d".into()]).unwrap();
        }
        let reloaded = RoutingRuleStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.list().len(), 1);
    }

    #[test]
    fn usage_not_decremented_on_removal() {
        let dir = TempDir::new().unwrap();
        let store = RoutingRuleStore::load(dir.path()).unwrap();
        store.add(Some(".blend".into()), None, vec!["3d".into()]).unwrap();
        store.match_and_bump(Some(".blend"), None);
        store.remove(Some(".blend".into()), None).unwrap();
        assert_eq!(store.list().len(), 0);
    }
}
