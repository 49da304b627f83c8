// Append-only rule version history.
//
// Every accepted mutation stores an immutable snapshot numbered one past
// the previous version (1 for the first). Reverting writes the old snapshot
// back as a new version, so numbers are never reused and intermediate
// versions survive.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit_record::{ActivityAction, ActivityLogEntry, EntityType};
use crate::diff::{collect_populated, describe_changes, diff_rules, render_unified, summarize_counts, ChangeCounts, RuleChange};
use crate::error::{Result, RuleEngineError};
use crate::rule_metadata::{Rule, RuleId};
use crate::store::RuleStore;

/// Immutable snapshot of a rule at one version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleVersion {
    pub id: String,
    pub rule_id: RuleId,
    pub version: u32,
    /// Differences from the previous version
    pub changes: Vec<RuleChange>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub snapshot: Rule,
}

/// Result of comparing two stored versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub rule_id: RuleId,
    pub from_version: u32,
    pub to_version: u32,
    pub changes: Vec<RuleChange>,
    pub counts: ChangeCounts,
    pub summary: String,
}

pub struct VersioningService {
    store: Arc<dyn RuleStore>,
}

impl VersioningService {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Snapshot `rule` as its next version.
    ///
    /// Without a `message` the summary counts the added, modified and
    /// deleted fields.
    pub async fn create_version(&self, rule: &Rule, user_id: &str, message: Option<&str>) -> Result<RuleVersion> {
        let record = self.prepare_version(rule, user_id, message).await?;
        self.commit_version(record).await
    }

    /// Build the next version of `rule` without persisting it. Callers that
    /// also overwrite the live record write it first and commit after.
    pub async fn prepare_version(&self, rule: &Rule, user_id: &str, message: Option<&str>) -> Result<RuleVersion> {
        // 1. Latest stored snapshot, if any
        let history = self.store.find_versions(&rule.id).await?;
        let previous = history.last();

        // 2. Diff against it, or record every populated field as added
        let changes = match previous {
            Some(prev) => diff_rules(&prev.snapshot, rule),
            None => collect_populated(rule),
        };
        let version = previous.map_or(1, |p| p.version + 1);

        let message = match message {
            Some(m) => m.to_string(),
            None if previous.is_none() => format!("Initial version: {}", summarize_counts(&changes)),
            None => summarize_counts(&changes),
        };

        let mut snapshot = rule.clone();
        snapshot.version = version;

        Ok(RuleVersion {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            version,
            changes,
            created_by: user_id.to_string(),
            created_at: Utc::now(),
            message,
            snapshot,
        })
    }

    /// Persist a version built by [`Self::prepare_version`].
    pub async fn commit_version(&self, record: RuleVersion) -> Result<RuleVersion> {
        let stored = self.store.create_version_record(record).await?;
        info!(
            "Created version {} of rule {} ({} changes)",
            stored.version,
            stored.rule_id,
            stored.changes.len()
        );
        Ok(stored)
    }

    /// All versions, newest first.
    pub async fn get_version_history(&self, rule_id: &RuleId) -> Result<Vec<RuleVersion>> {
        let mut history = self.store.find_versions(rule_id).await?;
        history.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(history)
    }

    pub async fn get_version(&self, rule_id: &RuleId, version: u32) -> Result<RuleVersion> {
        self.store
            .find_versions(rule_id)
            .await?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| RuleEngineError::VersionNotFound {
                rule_id: rule_id.clone(),
                version,
            })
    }

    /// Diff between two arbitrary stored versions, `from` -> `to`.
    pub async fn compare_versions(&self, rule_id: &RuleId, from: u32, to: u32) -> Result<VersionComparison> {
        let old = self.get_version(rule_id, from).await?;
        let new = self.get_version(rule_id, to).await?;
        let changes = diff_rules(&old.snapshot, &new.snapshot);
        Ok(VersionComparison {
            rule_id: rule_id.clone(),
            from_version: from,
            to_version: to,
            counts: ChangeCounts::of(&changes),
            summary: describe_changes(&changes),
            changes,
        })
    }

    /// Restore the snapshot of `target` as a new version and overwrite the
    /// live rule with it.
    pub async fn revert_to_version(&self, rule_id: &RuleId, target: u32, user_id: &str) -> Result<Rule> {
        // 1. Load the target snapshot and the live record
        let target_version = self.get_version(rule_id, target).await?;
        let current = self
            .store
            .find_rule_by_id(rule_id)
            .await?
            .ok_or_else(|| RuleEngineError::RuleNotFound(rule_id.clone()))?;

        // 2. Rebuild the rule from the snapshot; runtime counters stay
        let mut restored = target_version.snapshot;
        restored.updated_by = user_id.to_string();
        restored.metrics = current.metrics;

        // 3. Number it as the next version
        let message = format!("Reverted to version {}", target);
        let record = self.prepare_version(&restored, user_id, Some(&message)).await?;
        restored.version = record.version;

        // 4. Overwrite the live record, then append the version and log
        let saved = self.store.update_rule(restored).await?;
        self.commit_version(record).await?;
        self.store
            .create_activity_log_entry(ActivityLogEntry::new(
                ActivityAction::RuleReverted,
                EntityType::Rule,
                rule_id.as_str(),
                Some(user_id.to_string()),
                json!({ "targetVersion": target, "newVersion": saved.version }),
            ))
            .await?;

        info!("Rule {} reverted to version {} as version {}", rule_id, target, saved.version);
        Ok(saved)
    }

    /// Unified-diff style rendering of two stored versions.
    pub async fn get_diff(&self, rule_id: &RuleId, from: u32, to: u32) -> Result<String> {
        let old = self.get_version(rule_id, from).await?;
        let new = self.get_version(rule_id, to).await?;
        Ok(render_unified(
            &old.snapshot,
            &new.snapshot,
            &format!("version {}", from),
            &format!("version {}", to),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_clause::Action;
    use crate::diff::ChangeType;
    use crate::error::StoreError;
    use crate::match_clause::{Condition, ConditionOperator};
    use crate::rule_metadata::{RuleBuilder, RuleType};
    use crate::store::InMemoryRuleStore;
    use serde_json::json;

    fn rule() -> Rule {
        RuleBuilder::new("Max guards per month", RuleType::Planning)
            .id("max-guards")
            .active()
            .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
            .action(Action::prevent("planning.guard", "At most 2 guards per month"))
            .build()
    }

    fn service() -> (Arc<InMemoryRuleStore>, VersioningService) {
        let store = Arc::new(InMemoryRuleStore::with_rules([rule()]));
        let service = VersioningService::new(store.clone());
        (store, service)
    }

    #[tokio::test]
    async fn test_first_version_records_every_field_as_added() {
        let (_, service) = service();
        let v1 = service.create_version(&rule(), "alice", None).await.unwrap();
        assert_eq!(v1.version, 1);
        assert!(!v1.changes.is_empty());
        assert!(v1.changes.iter().all(|c| c.change_type == ChangeType::Add));
        assert!(v1.message.starts_with("Initial version"));
    }

    #[tokio::test]
    async fn test_second_version_records_only_modified_fields() {
        let (_, service) = service();
        let original = rule();
        service.create_version(&original, "alice", None).await.unwrap();

        let mut edited = original.clone();
        edited.name = "Max 2 guards per month".into();
        let v2 = service.create_version(&edited, "bob", Some("rename")).await.unwrap();

        assert_eq!(v2.version, 2);
        assert_eq!(v2.message, "rename");
        assert_eq!(v2.changes.len(), 1);
        assert_eq!(v2.changes[0].field, "name");
        assert_eq!(v2.changes[0].change_type, ChangeType::Modify);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_missing_versions_error() {
        let (_, service) = service();
        let mut r = rule();
        for priority in 1..=3 {
            r.priority = priority;
            service.create_version(&r, "alice", None).await.unwrap();
        }
        let history = service.get_version_history(&r.id).await.unwrap();
        let numbers: Vec<u32> = history.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let err = service.get_version(&r.id, 9).await.unwrap_err();
        assert!(matches!(err, RuleEngineError::VersionNotFound { version: 9, .. }));
    }

    #[tokio::test]
    async fn test_compare_non_adjacent_versions() {
        let (_, service) = service();
        let mut r = rule();
        service.create_version(&r, "alice", None).await.unwrap();
        r.priority = 4;
        service.create_version(&r, "alice", None).await.unwrap();
        r.name = "Guard cap".into();
        r.conditions[0].value = Some(json!(3));
        service.create_version(&r, "alice", None).await.unwrap();

        let comparison = service.compare_versions(&r.id, 1, 3).await.unwrap();
        assert_eq!(comparison.counts.modified, 3);
        assert!(comparison.summary.starts_with("Renamed from"));
        assert!(comparison.summary.contains("1 condition field(s) changed"));

        let text = service.get_diff(&r.id, 1, 3).await.unwrap();
        assert!(text.contains("+ priority: 4"));
    }

    #[tokio::test]
    async fn test_revert_appends_and_preserves_history() {
        let (store, service) = service();
        let original = rule();
        service.create_version(&original, "alice", None).await.unwrap();

        let mut edited = original.clone();
        for (i, name) in ["Second", "Third"].iter().enumerate() {
            edited.name = name.to_string();
            edited.priority = i as u32 + 5;
            store.update_rule(edited.clone()).await.unwrap();
            service.create_version(&edited, "bob", None).await.unwrap();
        }
        let before = service.get_version_history(&original.id).await.unwrap();

        let restored = service.revert_to_version(&original.id, 1, "carol").await.unwrap();
        assert_eq!(restored.name, original.name);
        assert_eq!(restored.priority, original.priority);
        assert_eq!(restored.conditions, original.conditions);
        assert_eq!(restored.version, 4);

        let after = service.get_version_history(&original.id).await.unwrap();
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after[0].message, "Reverted to version 1");
        assert_eq!(&after[1..], &before[..]);

        let live = store.find_rule_by_id(&original.id).await.unwrap().unwrap();
        assert_eq!(live.name, original.name);
        assert!(store
            .activity_log()
            .iter()
            .any(|e| e.action == ActivityAction::RuleReverted));
    }

    #[tokio::test]
    async fn test_failed_revert_leaves_history_unchanged() {
        let (store, service) = service();
        let original = rule();
        service.create_version(&original, "alice", None).await.unwrap();
        let mut edited = original.clone();
        edited.name = "Second".into();
        store.update_rule(edited.clone()).await.unwrap();
        service.create_version(&edited, "bob", None).await.unwrap();

        store.set_rejecting_updates(true);
        let err = service.revert_to_version(&original.id, 1, "carol").await.unwrap_err();
        assert!(matches!(err, RuleEngineError::Store(StoreError::Backend(_))));

        let history = service.get_version_history(&original.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);
        assert!(!store
            .activity_log()
            .iter()
            .any(|e| e.action == ActivityAction::RuleReverted));
        let live = store.find_rule_by_id(&original.id).await.unwrap().unwrap();
        assert_eq!(live.name, "Second");

        store.set_rejecting_updates(false);
        let restored = service.revert_to_version(&original.id, 1, "carol").await.unwrap();
        assert_eq!(restored.version, 3);
    }

    #[tokio::test]
    async fn test_revert_to_unknown_version_fails() {
        let (_, service) = service();
        service.create_version(&rule(), "alice", None).await.unwrap();
        let err = service.revert_to_version(&rule().id, 5, "carol").await.unwrap_err();
        assert!(matches!(err, RuleEngineError::VersionNotFound { .. }));
    }
}
