// Rule store interface and an in-memory implementation.
//
// The durable store (rule records, version snapshots, activity log) lives
// outside this crate. Everything here talks to it through the RuleStore
// trait; InMemoryRuleStore backs tests, demos and simulations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::audit_record::ActivityLogEntry;
use crate::error::StoreError;
use crate::rule_metadata::{Rule, RuleId, RuleStatus, RuleType};
use crate::versioning::RuleVersion;

// ============================================================================
// Filter
// ============================================================================

/// Query filter for [`RuleStore::find_active_rules`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleFilter {
    pub status: Option<RuleStatus>,
    pub rule_type: Option<RuleType>,
    pub enabled_only: bool,
    /// Only rules in effect at this instant
    pub effective_at: Option<DateTime<Utc>>,
    pub ids: Option<Vec<RuleId>>,
}

impl RuleFilter {
    /// Active, enabled rules regardless of validity window.
    pub fn active() -> Self {
        Self {
            status: Some(RuleStatus::Active),
            enabled_only: true,
            ..Default::default()
        }
    }

    /// Active, enabled rules in effect at `at`.
    pub fn active_at(at: DateTime<Utc>) -> Self {
        Self {
            effective_at: Some(at),
            ..Self::active()
        }
    }

    pub fn with_type(mut self, rule_type: RuleType) -> Self {
        self.rule_type = Some(rule_type);
        self
    }

    pub fn with_ids(mut self, ids: Vec<RuleId>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        self.status.map_or(true, |s| rule.status == s)
            && self.rule_type.map_or(true, |t| rule.rule_type == t)
            && (!self.enabled_only || rule.enabled)
            && self.effective_at.map_or(true, |at| rule.is_in_effect(at))
            && self.ids.as_ref().map_or(true, |ids| ids.contains(&rule.id))
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// Durable storage for rules, their version snapshots and the activity log.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn find_active_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError>;

    async fn find_rule_by_id(&self, id: &RuleId) -> Result<Option<Rule>, StoreError>;

    /// Rules in the order of `ids`; unknown ids are skipped.
    async fn find_rules_by_ids(&self, ids: &[RuleId]) -> Result<Vec<Rule>, StoreError>;

    async fn create_rule(&self, rule: Rule) -> Result<Rule, StoreError>;

    async fn update_rule(&self, rule: Rule) -> Result<Rule, StoreError>;

    /// Persist an immutable version snapshot. Version numbers must continue
    /// the rule's sequence without gaps.
    async fn create_version_record(&self, version: RuleVersion) -> Result<RuleVersion, StoreError>;

    /// All versions of a rule, oldest first.
    async fn find_versions(&self, rule_id: &RuleId) -> Result<Vec<RuleVersion>, StoreError>;

    async fn create_activity_log_entry(&self, entry: ActivityLogEntry) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local [`RuleStore`].
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<RuleId, Rule>>,
    versions: RwLock<HashMap<RuleId, Vec<RuleVersion>>>,
    activity: RwLock<Vec<ActivityLogEntry>>,
    /// Number of rule queries served, for cache assertions
    reads: AtomicUsize,
    unavailable: AtomicBool,
    reject_updates: AtomicBool,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let store = Self::new();
        for rule in rules {
            store.insert(rule);
        }
        store
    }

    /// Insert or replace a rule without any checks.
    pub fn insert(&self, rule: Rule) {
        self.rules.write().insert(rule.id.clone(), rule);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn activity_log(&self) -> Vec<ActivityLogEntry> {
        self.activity.read().clone()
    }

    /// Make every call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `update_rule` fail while every other call keeps working.
    pub fn set_rejecting_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn find_active_rules(&self, filter: &RuleFilter) -> Result<Vec<Rule>, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut rules: Vec<Rule> = self
            .rules
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn find_rule_by_id(&self, id: &RuleId) -> Result<Option<Rule>, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.rules.read().get(id).cloned())
    }

    async fn find_rules_by_ids(&self, ids: &[RuleId]) -> Result<Vec<Rule>, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rules = self.rules.read();
        Ok(ids.iter().filter_map(|id| rules.get(id).cloned()).collect())
    }

    async fn create_rule(&self, rule: Rule) -> Result<Rule, StoreError> {
        self.check_available()?;
        let mut rules = self.rules.write();
        if rules.contains_key(&rule.id) {
            return Err(StoreError::AlreadyExists(rule.id));
        }
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: Rule) -> Result<Rule, StoreError> {
        self.check_available()?;
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("update rejected".to_string()));
        }
        let mut rules = self.rules.write();
        match rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(rule)
            }
            None => Err(StoreError::NotFound(rule.id)),
        }
    }

    async fn create_version_record(&self, version: RuleVersion) -> Result<RuleVersion, StoreError> {
        self.check_available()?;
        let mut versions = self.versions.write();
        let history = versions.entry(version.rule_id.clone()).or_default();
        let expected = history.last().map_or(1, |v| v.version + 1);
        if version.version != expected {
            return Err(StoreError::VersionConflict {
                rule_id: version.rule_id.clone(),
                expected,
                actual: version.version,
            });
        }
        history.push(version.clone());
        Ok(version)
    }

    async fn find_versions(&self, rule_id: &RuleId) -> Result<Vec<RuleVersion>, StoreError> {
        self.check_available()?;
        Ok(self.versions.read().get(rule_id).cloned().unwrap_or_default())
    }

    async fn create_activity_log_entry(&self, entry: ActivityLogEntry) -> Result<(), StoreError> {
        self.check_available()?;
        self.activity.write().push(entry);
        Ok(())
    }
}
