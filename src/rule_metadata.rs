// Core rule definition for the staffing rule engine
//
// This module defines the record every other component works on: identity,
// classification, lifecycle status, validity window, the ordered conditions
// and actions, and bookkeeping (version, authorship, metrics).
//
// Rules are authored by operators through the UI and stored by an external
// repository, so the serialized shape follows the stored JSON records
// (camelCase fields, `"PLANNING"`-style type names, `"active"`-style statuses).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::action_clause::{Action, ActionType};
use crate::match_clause::{Condition, ConditionGroup};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a rule.
///
/// Identifiers are opaque strings owned by the rule store. Newly drafted rules
/// get a UUID v4; synthetic rules produced by conflict resolution use a
/// readable `merged-<a>-<b>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    /// Create a new random rule id.
    pub fn new() -> Self {
        RuleId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        RuleId(id.to_string())
    }
}

impl From<String> for RuleId {
    fn from(id: String) -> Self {
        RuleId(id)
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Classification & Lifecycle
// ============================================================================

/// Functional family of a rule. Drives the business-logic checks in the
/// validator (a PLANNING rule must look at dates, a LEAVE rule at quotas...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Planning,
    Leave,
    Constraint,
    Allocation,
    Supervision,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Planning => "PLANNING",
            RuleType::Leave => "LEAVE",
            RuleType::Constraint => "CONSTRAINT",
            RuleType::Allocation => "ALLOCATION",
            RuleType::Supervision => "SUPERVISION",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a rule.
///
/// ```text
/// draft ──► pending_approval ──► active ──► archived
///   └──────────────────────────────┘
/// ```
///
/// Drafts and pending rules may also be archived directly. Archived is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Draft,
    Active,
    Archived,
    PendingApproval,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Draft => "draft",
            RuleStatus::Active => "active",
            RuleStatus::Archived => "archived",
            RuleStatus::PendingApproval => "pending_approval",
        }
    }

    pub fn can_transition_to(&self, to: RuleStatus) -> bool {
        use RuleStatus::*;
        matches!(
            (self, to),
            (Draft, PendingApproval)
                | (Draft, Active)
                | (PendingApproval, Active)
                | (PendingApproval, Draft)
                | (Draft, Archived)
                | (PendingApproval, Archived)
                | (Active, Archived)
        )
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Metrics & Exceptions
// ============================================================================

/// Per rule execution statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMetrics {
    /// Number of times the rule was evaluated
    pub evaluation_count: u64,
    /// Number of failed evaluations
    pub violation_count: u64,
    /// Total evaluation time in microseconds
    pub total_execution_time_us: u64,
    /// Last evaluation timestamp
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl RuleMetrics {
    /// Record an evaluation
    pub fn record_evaluation(&mut self, passed: bool, execution_time_us: u64) {
        self.evaluation_count += 1;
        self.total_execution_time_us += execution_time_us;
        self.last_evaluated_at = Some(Utc::now());
        if !passed {
            self.violation_count += 1;
        }
    }

    /// Get average evaluation time in microseconds
    pub fn avg_execution_time_us(&self) -> u64 {
        if self.evaluation_count == 0 {
            0
        } else {
            self.total_execution_time_us / self.evaluation_count
        }
    }

    /// Get violation rate (0.0 to 1.0)
    pub fn violation_rate(&self) -> f64 {
        if self.evaluation_count == 0 {
            0.0
        } else {
            self.violation_count as f64 / self.evaluation_count as f64
        }
    }
}

/// Precedence marker attached by priority-based conflict resolution: the
/// carrying rule yields to `rule_id` wherever both apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleException {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub priority: u32,
    pub reason: String,
}

// ============================================================================
// Rule
// ============================================================================

/// Complete rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Higher value = more important
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub status: RuleStatus,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_groups: Vec<ConditionGroup>,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub effective_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub contexts: BTreeSet<String>,
    pub created_by: String,
    pub updated_by: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<RuleException>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RuleMetrics>,
}

fn default_enabled() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

impl Rule {
    /// True when `at` falls within `[effective_date, expiration_date)`.
    pub fn is_in_effect(&self, at: DateTime<Utc>) -> bool {
        self.effective_date <= at && self.expiration_date.map_or(true, |end| at < end)
    }

    /// A rule is evaluated only when active, enabled and in effect.
    pub fn is_eligible(&self, at: DateTime<Utc>) -> bool {
        self.status == RuleStatus::Active && self.enabled && self.is_in_effect(at)
    }

    /// Check if the rule carries an action of the given type
    pub fn has_action(&self, action_type: ActionType) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }

    /// Prohibition rules carry a PREVENT action; their conditions describe
    /// the forbidden situation rather than a requirement.
    pub fn is_prohibition(&self) -> bool {
        self.has_action(ActionType::Prevent)
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty() || !self.condition_groups.is_empty()
    }

    /// Top-level conditions followed by every grouped condition.
    pub fn all_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions
            .iter()
            .chain(self.condition_groups.iter().flat_map(|g| g.conditions.iter()))
    }

    pub fn condition_count(&self) -> usize {
        self.all_conditions().count()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Rule`].
///
/// Defaults: random id, `draft` status, enabled, priority 0, version 1,
/// effective from now, authored by `"system"`.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    pub fn new(name: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            rule: Rule {
                id: RuleId::new(),
                name: name.into(),
                description: String::new(),
                rule_type,
                priority: 0,
                enabled: true,
                status: RuleStatus::Draft,
                version: 1,
                conditions: Vec::new(),
                condition_groups: Vec::new(),
                actions: Vec::new(),
                effective_date: Utc::now(),
                expiration_date: None,
                tags: BTreeSet::new(),
                contexts: BTreeSet::new(),
                created_by: "system".to_string(),
                updated_by: "system".to_string(),
                exceptions: Vec::new(),
                metrics: None,
            },
        }
    }

    pub fn id(mut self, id: impl Into<RuleId>) -> Self {
        self.rule.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.rule.description = description.into();
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.rule.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    pub fn status(mut self, status: RuleStatus) -> Self {
        self.rule.status = status;
        self
    }

    /// Shorthand for `status(RuleStatus::Active)`.
    pub fn active(self) -> Self {
        self.status(RuleStatus::Active)
    }

    pub fn version(mut self, version: u32) -> Self {
        self.rule.version = version;
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.rule.conditions.push(condition);
        self
    }

    pub fn condition_group(mut self, group: ConditionGroup) -> Self {
        self.rule.condition_groups.push(group);
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.rule.actions.push(action);
        self
    }

    pub fn effective_date(mut self, at: DateTime<Utc>) -> Self {
        self.rule.effective_date = at;
        self
    }

    pub fn expiration_date(mut self, at: DateTime<Utc>) -> Self {
        self.rule.expiration_date = Some(at);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.rule.tags.insert(tag.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.rule.contexts.insert(context.into());
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        self.rule.created_by = user.clone();
        self.rule.updated_by = user;
        self
    }

    pub fn build(self) -> Rule {
        self.rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_clause::ConditionOperator;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_eligibility_requires_active_enabled_and_in_effect() {
        let now = Utc::now();
        let rule = RuleBuilder::new("Guard spacing", RuleType::Planning)
            .active()
            .effective_date(now - Duration::days(1))
            .expiration_date(now + Duration::days(1))
            .build();
        assert!(rule.is_eligible(now));
        assert!(!rule.is_eligible(now + Duration::days(2)));
        assert!(!rule.is_eligible(now - Duration::days(2)));

        let disabled = Rule { enabled: false, ..rule.clone() };
        assert!(!disabled.is_eligible(now));

        let draft = Rule { status: RuleStatus::Draft, ..rule };
        assert!(!draft.is_eligible(now));
    }

    #[test]
    fn test_expiration_is_exclusive() {
        let start = Utc::now();
        let end = start + Duration::days(7);
        let rule = RuleBuilder::new("Window", RuleType::Leave)
            .effective_date(start)
            .expiration_date(end)
            .build();
        assert!(rule.is_in_effect(start));
        assert!(!rule.is_in_effect(end));
    }

    #[test]
    fn test_prohibition_follows_prevent_action() {
        let rule = RuleBuilder::new("Max guards", RuleType::Planning)
            .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
            .action(Action::prevent("planning.guard", "Too many guards"))
            .build();
        assert!(rule.is_prohibition());
        assert!(rule.has_conditions());
        assert_eq!(rule.condition_count(), 1);
    }

    #[test]
    fn test_deserializes_stored_record_shape() {
        let value = json!({
            "id": "rule-1",
            "name": "Senior per shift",
            "type": "SUPERVISION",
            "priority": 12,
            "status": "pending_approval",
            "conditions": [
                {"field": "shift.seniorCount", "operator": "GREATER_THAN_OR_EQUALS", "value": 1}
            ],
            "actions": [
                {"type": "NOTIFY", "target": "planner", "message": "No senior on shift"}
            ],
            "effectiveDate": "2026-01-01T00:00:00Z",
            "createdBy": "alice",
            "updatedBy": "alice"
        });
        let rule: Rule = serde_json::from_value(value).unwrap();
        assert_eq!(rule.id.as_str(), "rule-1");
        assert_eq!(rule.rule_type, RuleType::Supervision);
        assert_eq!(rule.status, RuleStatus::PendingApproval);
        assert!(rule.enabled);
        assert_eq!(rule.version, 1);
        assert_eq!(rule.conditions[0].operator, ConditionOperator::GreaterThanOrEquals);
    }

    #[test]
    fn test_metrics_track_violations_and_latency() {
        let mut metrics = RuleMetrics::default();
        metrics.record_evaluation(true, 100);
        metrics.record_evaluation(false, 300);
        assert_eq!(metrics.evaluation_count, 2);
        assert_eq!(metrics.violation_count, 1);
        assert_eq!(metrics.avg_execution_time_us(), 200);
        assert!((metrics.violation_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_archived_is_terminal() {
        assert!(RuleStatus::Draft.can_transition_to(RuleStatus::Active));
        assert!(RuleStatus::Active.can_transition_to(RuleStatus::Archived));
        assert!(!RuleStatus::Active.can_transition_to(RuleStatus::Draft));
        assert!(!RuleStatus::Archived.can_transition_to(RuleStatus::Active));
    }
}
