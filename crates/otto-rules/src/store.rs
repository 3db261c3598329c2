//! Durable rule storage.
//!
//! One JSON document per rule, keyed by rule id. Writes go through a temp
//! file and an atomic rename so a kill between writes never leaves a
//! half-written rule. Unknown keys found on load are kept and written back
//! on the next save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

use otto_types::RuleId;

use crate::rule::Rule;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// On-disk shape of one rule: the rule's own fields plus any keys this
/// server version does not know about.
#[derive(Debug, Serialize, Deserialize)]
struct RuleRecord {
    #[serde(flatten)]
    rule: Rule,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// The persistent rule store.
pub struct RuleStore {
    dir: PathBuf,
    extras: HashMap<RuleId, Map<String, Value>>,
}

impl RuleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extras: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn rule_path(&self, id: RuleId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load all persisted rules, ordered by rule id. Undecodable files are
    /// skipped with a warning; missing keys fall back to their defaults.
    pub async fn load(&mut self) -> StoreResult<Vec<Rule>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<RuleRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping undecodable rule file"),
            }
        }

        records.sort_by_key(|r| r.rule.id.to_string());

        let mut rules = Vec::with_capacity(records.len());
        for record in records {
            if !record.extra.is_empty() {
                self.extras.insert(record.rule.id, record.extra);
            }
            rules.push(record.rule);
        }
        debug!(count = rules.len(), dir = %self.dir.display(), "Loaded rules");
        Ok(rules)
    }

    /// Persist one rule atomically, carrying over any preserved unknown
    /// keys.
    pub async fn save(&self, rule: &Rule) -> StoreResult<()> {
        fs::create_dir_all(&self.dir).await?;

        let record = RuleRecord {
            rule: rule.clone(),
            extra: self.extras.get(&rule.id).cloned().unwrap_or_default(),
        };
        let content = serde_json::to_string_pretty(&record)?;

        let path = self.rule_path(rule.id);
        let tmp_path = self.dir.join(format!("{}.json.tmp", rule.id));
        fs::write(&tmp_path, &content).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!(rule_id = %rule.id, "Saved rule");
        Ok(())
    }

    /// Remove one rule's document and its preserved keys.
    pub async fn remove(&mut self, id: RuleId) -> StoreResult<()> {
        let path = self.rule_path(id);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        self.extras.remove(&id);
        debug!(rule_id = %id, "Removed rule");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otto_types::{ActionTypeId, DeviceId, RuleAction};
    use tempfile::TempDir;

    fn sample_rule(name: &str) -> Rule {
        let mut rule = Rule::new(RuleId::new(), name);
        rule.actions = vec![RuleAction::new(ActionTypeId::new(), DeviceId::new(), vec![])];
        rule
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = RuleStore::new(dir.path());

        let rule = sample_rule("heating");
        store.save(&rule).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![rule]);
    }

    #[tokio::test]
    async fn reload_and_resave_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let mut store = RuleStore::new(dir.path());

        let rule = sample_rule("stable");
        store.save(&rule).await.unwrap();
        let first = fs::read_to_string(store.rule_path(rule.id)).await.unwrap();

        let mut cold = RuleStore::new(dir.path());
        let loaded = cold.load().await.unwrap();
        cold.save(&loaded[0]).await.unwrap();
        let second = fs::read_to_string(store.rule_path(rule.id)).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_keys_survive_a_rewrite() {
        let dir = TempDir::new().unwrap();
        let mut store = RuleStore::new(dir.path());

        let rule = sample_rule("annotated");
        store.save(&rule).await.unwrap();

        // Another tool added a key this version does not know.
        let path = store.rule_path(rule.id);
        let mut doc: Value =
            serde_json::from_str(&fs::read_to_string(&path).await.unwrap()).unwrap();
        doc["favourite"] = Value::Bool(true);
        fs::write(&path, serde_json::to_string_pretty(&doc).unwrap())
            .await
            .unwrap();

        let mut cold = RuleStore::new(dir.path());
        let loaded = cold.load().await.unwrap();
        cold.save(&loaded[0]).await.unwrap();

        let rewritten: Value =
            serde_json::from_str(&fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(rewritten["favourite"], Value::Bool(true));
    }

    #[tokio::test]
    async fn remove_deletes_the_document() {
        let dir = TempDir::new().unwrap();
        let mut store = RuleStore::new(dir.path());

        let rule = sample_rule("gone");
        store.save(&rule).await.unwrap();
        store.remove(rule.id).await.unwrap();

        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut store = RuleStore::new(dir.path());

        store.save(&sample_rule("good")).await.unwrap();
        fs::write(dir.path().join("broken.json"), "{not json")
            .await
            .unwrap();

        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rules_load_ordered_by_id() {
        let dir = TempDir::new().unwrap();
        let mut store = RuleStore::new(dir.path());

        for name in ["a", "b", "c"] {
            store.save(&sample_rule(name)).await.unwrap();
        }

        let loaded = store.load().await.unwrap();
        let ids: Vec<String> = loaded.iter().map(|r| r.id.to_string()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids, sorted);
    }
}
