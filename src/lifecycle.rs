// Rule lifecycle management.
//
// State transitions:
// - draft → pending_approval → active → archived
// - draft → active (direct activation)
// - pending_approval → draft (sent back)
// - draft / pending_approval → archived (abandoned)
//
// Versioning:
// - Activation creates the first snapshot (version 1 for a new rule)
// - Every update of an active rule and every archive appends a version
// - Drafts are edited in place without versions
//
// Every mutation writes an activity-log entry and, when an engine is
// attached, clears its caches so the next evaluation sees the change.

use log::info;
use serde_json::json;
use std::sync::Arc;

use crate::audit_record::{ActivityAction, ActivityLogEntry, EntityType};
use crate::engine::RuleEngine;
use crate::error::{Result, RuleEngineError};
use crate::rule_metadata::{Rule, RuleId, RuleStatus};
use crate::store::{RuleFilter, RuleStore};
use crate::validator::{RuleValidator, ValidationReport};
use crate::versioning::VersioningService;

pub struct RuleLifecycle {
    store: Arc<dyn RuleStore>,
    versioning: VersioningService,
    validator: RuleValidator,
    engine: Option<Arc<RuleEngine>>,
}

impl RuleLifecycle {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            versioning: VersioningService::new(Arc::clone(&store)),
            store,
            validator: RuleValidator::new(),
            engine: None,
        }
    }

    pub fn with_validator(mut self, validator: RuleValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Clear this engine's caches after every mutation.
    pub fn with_engine(mut self, engine: Arc<RuleEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn versioning(&self) -> &VersioningService {
        &self.versioning
    }

    pub fn validator(&self) -> &RuleValidator {
        &self.validator
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    /// Store `rule` as a new draft authored by `user_id`. Drafts may be
    /// incomplete, so nothing is validated here.
    pub async fn create_draft(&self, mut rule: Rule, user_id: &str) -> Result<Rule> {
        rule.status = RuleStatus::Draft;
        rule.version = 1;
        rule.created_by = user_id.to_string();
        rule.updated_by = user_id.to_string();

        let created = self.store.create_rule(rule).await?;
        self.log_activity(ActivityAction::RuleCreated, &created, user_id, json!({ "name": created.name }))
            .await?;
        info!("Draft rule '{}' ({}) created by {}", created.name, created.id, user_id);
        Ok(created)
    }

    // ========================================================================
    // TRANSITIONS
    // ========================================================================

    /// draft → pending_approval. The rule must already be valid.
    pub async fn submit_for_approval(&self, rule_id: &RuleId, user_id: &str) -> Result<Rule> {
        let mut rule = self.load(rule_id).await?;
        ensure_transition(&rule, RuleStatus::PendingApproval)?;
        let report = self.validator.validate_rule(&rule);
        if !report.is_valid {
            return Err(RuleEngineError::ValidationFailed(report));
        }

        rule.status = RuleStatus::PendingApproval;
        rule.updated_by = user_id.to_string();
        let saved = self.store.update_rule(rule).await?;
        self.log_activity(ActivityAction::RuleSubmitted, &saved, user_id, json!({})).await?;
        info!("Rule {} submitted for approval by {}", saved.id, user_id);
        Ok(saved)
    }

    /// draft / pending_approval → active.
    ///
    /// Validates against the active set (conflicts and redundancy come back
    /// as warnings in the activity entry) and snapshots the rule.
    pub async fn activate(&self, rule_id: &RuleId, user_id: &str) -> Result<Rule> {
        // 1. Load and check the transition
        let mut rule = self.load(rule_id).await?;
        ensure_transition(&rule, RuleStatus::Active)?;

        // 2. Validate against what is already live
        let report = self.validate_against_active(&rule).await?;
        if !report.is_valid {
            return Err(RuleEngineError::ValidationFailed(report));
        }

        // 3. Persist, then record the snapshot
        rule.status = RuleStatus::Active;
        rule.updated_by = user_id.to_string();
        let version = self.versioning.prepare_version(&rule, user_id, None).await?;
        rule.version = version.version;
        let saved = self.store.update_rule(rule).await?;
        self.versioning.commit_version(version).await?;

        // 4. Audit and invalidate
        self.log_activity(
            ActivityAction::RuleActivated,
            &saved,
            user_id,
            json!({ "version": saved.version, "warnings": report.warnings }),
        )
        .await?;
        self.invalidate();
        info!("Rule '{}' ({}) activated at version {}", saved.name, saved.id, saved.version);
        Ok(saved)
    }

    /// Replace the definition of an existing rule. The stored status is
    /// kept; use the transition methods to change it. Active rules are
    /// re-validated and versioned.
    pub async fn update(&self, mut rule: Rule, user_id: &str, message: Option<&str>) -> Result<Rule> {
        // 1. Current record decides status and versioning
        let current = self.load(&rule.id).await?;
        if current.status == RuleStatus::Archived {
            return Err(RuleEngineError::InvalidTransition {
                rule_id: current.id,
                from: RuleStatus::Archived,
                to: RuleStatus::Archived,
            });
        }
        rule.status = current.status;
        rule.created_by = current.created_by.clone();
        rule.updated_by = user_id.to_string();
        rule.version = current.version;
        rule.metrics = current.metrics.clone();

        // 2. Validate and version live rules
        let mut pending = None;
        if current.status == RuleStatus::Active {
            let report = self.validate_against_active(&rule).await?;
            if !report.is_valid {
                return Err(RuleEngineError::ValidationFailed(report));
            }
            let version = self.versioning.prepare_version(&rule, user_id, message).await?;
            rule.version = version.version;
            pending = Some(version);
        }

        // 3. Persist, record the version, audit, invalidate
        let saved = self.store.update_rule(rule).await?;
        if let Some(version) = pending {
            self.versioning.commit_version(version).await?;
        }
        self.log_activity(
            ActivityAction::RuleUpdated,
            &saved,
            user_id,
            json!({ "version": saved.version, "message": message }),
        )
        .await?;
        self.invalidate();
        info!("Rule {} updated by {} (version {})", saved.id, user_id, saved.version);
        Ok(saved)
    }

    /// Soft-remove a rule from evaluation. History is retained.
    pub async fn archive(&self, rule_id: &RuleId, user_id: &str) -> Result<Rule> {
        let mut rule = self.load(rule_id).await?;
        ensure_transition(&rule, RuleStatus::Archived)?;
        let was_versioned = !self.store.find_versions(rule_id).await?.is_empty();

        rule.status = RuleStatus::Archived;
        rule.updated_by = user_id.to_string();
        let mut pending = None;
        if was_versioned {
            let version = self.versioning.prepare_version(&rule, user_id, Some("Archived")).await?;
            rule.version = version.version;
            pending = Some(version);
        }
        let saved = self.store.update_rule(rule).await?;
        if let Some(version) = pending {
            self.versioning.commit_version(version).await?;
        }

        self.log_activity(ActivityAction::RuleArchived, &saved, user_id, json!({ "version": saved.version }))
            .await?;
        self.invalidate();
        info!("Rule {} archived by {}", saved.id, user_id);
        Ok(saved)
    }

    /// Revert to a stored version and invalidate the engine caches.
    pub async fn revert(&self, rule_id: &RuleId, target_version: u32, user_id: &str) -> Result<Rule> {
        let current = self.load(rule_id).await?;
        if current.status == RuleStatus::Archived {
            return Err(RuleEngineError::InvalidTransition {
                rule_id: current.id,
                from: RuleStatus::Archived,
                to: RuleStatus::Active,
            });
        }
        let restored = self.versioning.revert_to_version(rule_id, target_version, user_id).await?;
        self.invalidate();
        Ok(restored)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load(&self, rule_id: &RuleId) -> Result<Rule> {
        self.store
            .find_rule_by_id(rule_id)
            .await?
            .ok_or_else(|| RuleEngineError::RuleNotFound(rule_id.clone()))
    }

    async fn validate_against_active(&self, rule: &Rule) -> Result<ValidationReport> {
        let active = self.store.find_active_rules(&RuleFilter::active()).await?;
        Ok(self.validator.validate_against_existing(rule, &active))
    }

    async fn log_activity(
        &self,
        action: ActivityAction,
        rule: &Rule,
        user_id: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        let entry = ActivityLogEntry::new(
            action,
            EntityType::Rule,
            rule.id.as_str(),
            Some(user_id.to_string()),
            details,
        );
        self.store.create_activity_log_entry(entry).await?;
        Ok(())
    }

    fn invalidate(&self) {
        if let Some(engine) = &self.engine {
            engine.clear_cache();
        }
    }
}

fn ensure_transition(rule: &Rule, to: RuleStatus) -> Result<()> {
    if rule.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(RuleEngineError::InvalidTransition {
            rule_id: rule.id.clone(),
            from: rule.status,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_clause::Action;
    use crate::match_clause::{Condition, ConditionOperator, EvaluationContext};
    use crate::rule_metadata::{RuleBuilder, RuleType};
    use crate::store::InMemoryRuleStore;
    use serde_json::json;

    fn guard_rule() -> Rule {
        RuleBuilder::new("Max guards per month", RuleType::Constraint)
            .id("max-guards")
            .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
            .action(Action::prevent("planning.guard", "At most 2 guards per month"))
            .build()
    }

    fn setup() -> (Arc<InMemoryRuleStore>, Arc<RuleEngine>, RuleLifecycle) {
        let store = Arc::new(InMemoryRuleStore::new());
        let engine = Arc::new(RuleEngine::new(store.clone()));
        let lifecycle = RuleLifecycle::new(store.clone()).with_engine(Arc::clone(&engine));
        (store, engine, lifecycle)
    }

    #[tokio::test]
    async fn test_full_lifecycle_versions_and_audits() {
        let (store, _, lifecycle) = setup();
        let draft = lifecycle.create_draft(guard_rule(), "alice").await.unwrap();
        assert_eq!(draft.status, RuleStatus::Draft);

        let pending = lifecycle.submit_for_approval(&draft.id, "alice").await.unwrap();
        assert_eq!(pending.status, RuleStatus::PendingApproval);

        let active = lifecycle.activate(&draft.id, "bob").await.unwrap();
        assert_eq!(active.status, RuleStatus::Active);
        assert_eq!(active.version, 1);

        let mut edited = active.clone();
        edited.priority = 7;
        let updated = lifecycle.update(edited, "bob", Some("raise priority")).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.status, RuleStatus::Active);

        let archived = lifecycle.archive(&draft.id, "carol").await.unwrap();
        assert_eq!(archived.status, RuleStatus::Archived);
        assert_eq!(archived.version, 3);

        let history = lifecycle.versioning().get_version_history(&draft.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].message, "raise priority");

        let actions: Vec<ActivityAction> = store.activity_log().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                ActivityAction::RuleCreated,
                ActivityAction::RuleSubmitted,
                ActivityAction::RuleActivated,
                ActivityAction::RuleUpdated,
                ActivityAction::RuleArchived,
            ]
        );
        assert!(store.activity_log().iter().all(|e| e.verify_provenance()));
    }

    #[tokio::test]
    async fn test_illegal_transitions_are_rejected() {
        let (_, _, lifecycle) = setup();
        let draft = lifecycle.create_draft(guard_rule(), "alice").await.unwrap();
        lifecycle.archive(&draft.id, "alice").await.unwrap();

        let err = lifecycle.activate(&draft.id, "bob").await.unwrap_err();
        assert!(matches!(
            err,
            RuleEngineError::InvalidTransition {
                from: RuleStatus::Archived,
                to: RuleStatus::Active,
                ..
            }
        ));
        assert!(lifecycle.update(guard_rule(), "bob", None).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_rule_cannot_be_activated() {
        let (_, _, lifecycle) = setup();
        let incomplete = RuleBuilder::new("No actions", RuleType::Constraint)
            .id("incomplete")
            .condition(Condition::new("user.role", ConditionOperator::Equals, "MAR"))
            .build();
        lifecycle.create_draft(incomplete, "alice").await.unwrap();

        let err = lifecycle.activate(&"incomplete".into(), "bob").await.unwrap_err();
        match err {
            RuleEngineError::ValidationFailed(report) => assert!(report.has_error("actions")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_activation_clears_engine_cache() {
        let (_, engine, lifecycle) = setup();
        let context = EvaluationContext::new(json!({"planning": {"guardCount": 5}}));

        let draft = lifecycle.create_draft(guard_rule(), "alice").await.unwrap();
        assert!(engine.evaluate_rules(&context, None).await.is_empty());

        lifecycle.activate(&draft.id, "bob").await.unwrap();
        let results = engine.evaluate_rules(&context, None).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
    }

    #[tokio::test]
    async fn test_failed_writes_record_no_versions() {
        let (store, _, lifecycle) = setup();
        let draft = lifecycle.create_draft(guard_rule(), "alice").await.unwrap();

        store.set_rejecting_updates(true);
        assert!(lifecycle.activate(&draft.id, "bob").await.is_err());
        assert!(lifecycle.versioning().get_version_history(&draft.id).await.unwrap().is_empty());

        store.set_rejecting_updates(false);
        let active = lifecycle.activate(&draft.id, "bob").await.unwrap();
        assert_eq!(active.version, 1);

        store.set_rejecting_updates(true);
        let mut edited = active.clone();
        edited.priority = 9;
        assert!(lifecycle.update(edited, "bob", None).await.is_err());
        assert!(lifecycle.archive(&draft.id, "bob").await.is_err());

        let history = lifecycle.versioning().get_version_history(&draft.id).await.unwrap();
        assert_eq!(history.len(), 1);
        let live = store.find_rule_by_id(&draft.id).await.unwrap().unwrap();
        assert_eq!(live.status, RuleStatus::Active);
        assert_eq!(live.version, 1);
    }

    #[tokio::test]
    async fn test_revert_through_lifecycle() {
        let (_, _, lifecycle) = setup();
        let draft = lifecycle.create_draft(guard_rule(), "alice").await.unwrap();
        let active = lifecycle.activate(&draft.id, "bob").await.unwrap();
        let mut edited = active.clone();
        edited.name = "Renamed guard cap".into();
        lifecycle.update(edited, "bob", None).await.unwrap();

        let restored = lifecycle.revert(&draft.id, 1, "carol").await.unwrap();
        assert_eq!(restored.name, "Max guards per month");
        assert_eq!(restored.version, 3);
    }
}
