// Pairwise conflict detection between rules, and heuristic resolution.
//
// Four independent analyses run for every pair:
// 1. Condition overlap: same field, contradictory or intersecting operands
// 2. Action contradiction: same target, ALLOW vs PREVENT or differing MODIFYs
// 3. Resource conflict: shared user/assignment resources with contradictory actions
// 4. Timing conflict: overlapping validity windows with contradictory
//    date/time conditions
//
// Conflict ids are derived from the conflict type and the sorted rule ids,
// so detection in either direction yields the same key.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};

use crate::action_clause::{Action, ActionType};
use crate::audit_record::{ActivityAction, ActivityLogEntry, EntityType};
use crate::config::SeverityThresholds;
use crate::error::{Result, RuleEngineError};
use crate::match_clause::{compare_values, values_equal, Condition, ConditionOperator};
use crate::rule_metadata::{Rule, RuleException, RuleId};
use crate::store::RuleStore;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ConditionOverlap,
    ActionContradiction,
    ResourceConflict,
    TimingConflict,
}

impl ConflictType {
    fn key_prefix(&self) -> &'static str {
        match self {
            ConflictType::ConditionOverlap => "overlap",
            ConflictType::ActionContradiction => "action",
            ConflictType::ResourceConflict => "resource",
            ConflictType::TimingConflict => "timing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// How two conditions on the same field collide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
    /// Both EQUALS with different values
    Contradiction,
    /// Both BETWEEN with intersecting closed intervals
    RangeOverlap,
    /// IN against NOT_IN with a shared member
    InclusionConflict,
}

impl OverlapKind {
    fn label(&self) -> &'static str {
        match self {
            OverlapKind::Contradiction => "contradictory conditions",
            OverlapKind::RangeOverlap => "overlapping value ranges",
            OverlapKind::InclusionConflict => "inclusion/exclusion conflicts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOverlap {
    pub field: String,
    pub kind: OverlapKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    Priority,
    Merge,
    Override,
    Manual,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionStrategy::Priority => "priority",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Override => "override",
            ResolutionStrategy::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub id: String,
    pub conflict_id: String,
    pub strategy: ResolutionStrategy,
    pub resolved_rules: Vec<Rule>,
    pub resolved_by: Option<String>,
    pub resolved_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConflict {
    pub id: String,
    pub rule_ids: [RuleId; 2],
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    /// Field-level findings behind a condition overlap
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlaps: Vec<ConditionOverlap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
}

impl RuleConflict {
    fn new(
        conflict_type: ConflictType,
        a: &Rule,
        b: &Rule,
        severity: ConflictSeverity,
        description: String,
    ) -> Self {
        Self {
            id: conflict_key(conflict_type, &a.id, &b.id),
            rule_ids: [a.id.clone(), b.id.clone()],
            conflict_type,
            severity,
            description,
            detected_at: Utc::now(),
            overlaps: Vec::new(),
            resolution: None,
        }
    }

    pub fn mark_resolved(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Deterministic id for a conflict between two rules.
pub fn conflict_key(conflict_type: ConflictType, a: &RuleId, b: &RuleId) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}-{}-{}", conflict_type.key_prefix(), first, second)
}

// ============================================================================
// Detector
// ============================================================================

/// Classifies pairwise relationships between rules.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    thresholds: SeverityThresholds,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }

    /// Conflicts between `rule` and every other rule in `existing`.
    pub fn detect_conflicts(&self, rule: &Rule, existing: &[Rule]) -> Vec<RuleConflict> {
        existing
            .iter()
            .filter(|other| other.id != rule.id)
            .flat_map(|other| self.analyze_pair(rule, other))
            .collect()
    }

    /// Every conflict within a rule set, each reported once.
    pub fn detect_all_conflicts(&self, rules: &[Rule]) -> Vec<RuleConflict> {
        let mut seen = HashSet::new();
        let mut conflicts = Vec::new();
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if a.id == b.id {
                    continue;
                }
                for conflict in self.analyze_pair(a, b) {
                    if seen.insert(conflict.id.clone()) {
                        conflicts.push(conflict);
                    }
                }
            }
        }
        conflicts
    }

    fn analyze_pair(&self, a: &Rule, b: &Rule) -> Vec<RuleConflict> {
        [
            self.analyze_condition_overlap(a, b),
            analyze_action_contradiction(a, b),
            analyze_resource_conflict(a, b),
            analyze_timing_conflict(a, b),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn analyze_condition_overlap(&self, a: &Rule, b: &Rule) -> Option<RuleConflict> {
        let overlaps = find_condition_overlaps(&a.conditions, &b.conditions);
        if overlaps.is_empty() {
            return None;
        }
        let severity = self.overlap_severity(&overlaps, a, b);

        let fields: BTreeSet<&str> = overlaps.iter().map(|o| o.field.as_str()).collect();
        let mut kinds: Vec<&str> = Vec::new();
        for overlap in &overlaps {
            if !kinds.contains(&overlap.kind.label()) {
                kinds.push(overlap.kind.label());
            }
        }
        let description = format!(
            "Rules \"{}\" and \"{}\" have {} on fields: {}",
            a.name,
            b.name,
            kinds.join(", "),
            fields.into_iter().collect::<Vec<_>>().join(", ")
        );

        let mut conflict = RuleConflict::new(ConflictType::ConditionOverlap, a, b, severity, description);
        conflict.overlaps = overlaps;
        Some(conflict)
    }

    fn overlap_severity(&self, overlaps: &[ConditionOverlap], a: &Rule, b: &Rule) -> ConflictSeverity {
        let has_contradiction = overlaps.iter().any(|o| o.kind == OverlapKind::Contradiction);
        let threshold = self.thresholds.critical_contradiction_priority;

        if a.priority >= threshold && b.priority >= threshold && has_contradiction {
            ConflictSeverity::Critical
        } else if overlaps.len() > self.thresholds.high_severity_overlap_count || has_contradiction {
            ConflictSeverity::High
        } else if overlaps.iter().any(|o| o.kind == OverlapKind::RangeOverlap) {
            ConflictSeverity::Medium
        } else {
            ConflictSeverity::Low
        }
    }
}

fn find_condition_overlaps(first: &[Condition], second: &[Condition]) -> Vec<ConditionOverlap> {
    let mut overlaps = Vec::new();
    for c1 in first {
        for c2 in second.iter().filter(|c2| c2.field == c1.field) {
            if let Some(kind) = classify_overlap(c1, c2) {
                overlaps.push(ConditionOverlap {
                    field: c1.field.clone(),
                    kind,
                });
            }
        }
    }
    overlaps
}

fn classify_overlap(c1: &Condition, c2: &Condition) -> Option<OverlapKind> {
    use ConditionOperator::*;
    let v1 = c1.value.as_ref().unwrap_or(&Value::Null);
    let v2 = c2.value.as_ref().unwrap_or(&Value::Null);

    match (c1.operator, c2.operator) {
        (Equals, Equals) if !values_equal(v1, v2) => Some(OverlapKind::Contradiction),
        (Between, Between) => {
            let (min1, max1) = pair(v1)?;
            let (min2, max2) = pair(v2)?;
            let intersects = at_least(max1, min2)? && at_least(max2, min1)?;
            intersects.then_some(OverlapKind::RangeOverlap)
        }
        (In, NotIn) | (NotIn, In) => {
            let (xs, ys) = (v1.as_array()?, v2.as_array()?);
            xs.iter()
                .any(|x| ys.iter().any(|y| values_equal(x, y)))
                .then_some(OverlapKind::InclusionConflict)
        }
        _ => None,
    }
}

fn pair(value: &Value) -> Option<(&Value, &Value)> {
    match value.as_array().map(Vec::as_slice) {
        Some([min, max]) => Some((min, max)),
        _ => None,
    }
}

fn at_least(a: &Value, b: &Value) -> Option<bool> {
    compare_values(a, b).map(|o| o.is_ge())
}

fn analyze_action_contradiction(a: &Rule, b: &Rule) -> Option<RuleConflict> {
    let mut contradictions = Vec::new();
    for a1 in &a.actions {
        for a2 in b.actions.iter().filter(|a2| a2.target == a1.target) {
            if !a1.contradicts(a2) {
                continue;
            }
            let target = a1.target.as_deref().unwrap_or("<none>");
            if a1.action_type == ActionType::Modify {
                contradictions.push(format!("conflicting modifications on {}", target));
            } else {
                contradictions.push(format!("opposite actions on {}", target));
            }
        }
    }
    if contradictions.is_empty() {
        return None;
    }
    let severity = if contradictions.len() > 1 {
        ConflictSeverity::High
    } else {
        ConflictSeverity::Medium
    };
    Some(RuleConflict::new(
        ConflictType::ActionContradiction,
        a,
        b,
        severity,
        format!("Action contradictions: {}", contradictions.join(", ")),
    ))
}

/// Fields under `user.` / `assignment.` plus every action target.
fn resource_targets(rule: &Rule) -> BTreeSet<&str> {
    let from_conditions = rule
        .conditions
        .iter()
        .map(|c| c.field.as_str())
        .filter(|f| f.contains("user.") || f.contains("assignment."));
    let from_actions = rule.actions.iter().filter_map(|a| a.target.as_deref());
    from_conditions.chain(from_actions).collect()
}

fn analyze_resource_conflict(a: &Rule, b: &Rule) -> Option<RuleConflict> {
    let resources_a = resource_targets(a);
    let resources_b = resource_targets(b);
    let common: Vec<&str> = resources_a.intersection(&resources_b).copied().collect();
    if common.is_empty() {
        return None;
    }

    let conflicting = common.iter().any(|resource| {
        let target = Some(*resource);
        a.actions
            .iter()
            .filter(|x| x.target.as_deref() == target)
            .any(|x| {
                b.actions
                    .iter()
                    .filter(|y| y.target.as_deref() == target)
                    .any(|y| x.contradicts(y))
            })
    });
    if !conflicting {
        return None;
    }
    Some(RuleConflict::new(
        ConflictType::ResourceConflict,
        a,
        b,
        ConflictSeverity::Medium,
        format!("Rules try to control the same resources: {}", common.join(", ")),
    ))
}

fn is_temporal(condition: &Condition) -> bool {
    condition.field.contains("date") || condition.field.contains("time")
}

fn windows_overlap(a: &Rule, b: &Rule) -> bool {
    let a_before_b_ends = b.expiration_date.map_or(true, |end| a.effective_date <= end);
    let b_before_a_ends = a.expiration_date.map_or(true, |end| b.effective_date <= end);
    a_before_b_ends && b_before_a_ends
}

fn analyze_timing_conflict(a: &Rule, b: &Rule) -> Option<RuleConflict> {
    if !windows_overlap(a, b) {
        return None;
    }
    let times_a: Vec<&Condition> = a.conditions.iter().filter(|c| is_temporal(c)).collect();
    let times_b: Vec<&Condition> = b.conditions.iter().filter(|c| is_temporal(c)).collect();
    if times_a.is_empty() || times_b.is_empty() {
        return None;
    }
    let contradiction = times_a.iter().any(|c1| {
        times_b
            .iter()
            .any(|c2| c1.field == c2.field && classify_overlap(c1, c2) == Some(OverlapKind::Contradiction))
    });
    if !contradiction {
        return None;
    }
    Some(RuleConflict::new(
        ConflictType::TimingConflict,
        a,
        b,
        ConflictSeverity::Medium,
        "Rules have overlapping validity periods with contradictory time conditions".to_string(),
    ))
}

// ============================================================================
// Resolution
// ============================================================================

impl ConflictDetector {
    /// Resolve a conflict with the given strategy and record the resolution
    /// in the store's activity log.
    ///
    /// `manual` must carry the final rule set for [`ResolutionStrategy::Manual`]
    /// and is ignored otherwise.
    pub async fn resolve_conflict(
        &self,
        store: &dyn RuleStore,
        conflict: &RuleConflict,
        strategy: ResolutionStrategy,
        manual: Option<Vec<Rule>>,
        resolved_by: Option<&str>,
    ) -> Result<ConflictResolution> {
        let resolved_rules = match strategy {
            ResolutionStrategy::Manual => match manual {
                Some(rules) if !rules.is_empty() => rules,
                _ => {
                    return Err(RuleEngineError::ConflictResolution(
                        "manual resolution requires resolved rules".to_string(),
                    ))
                }
            },
            ResolutionStrategy::Priority => {
                let (first, second) = load_pair(store, conflict).await?;
                resolve_by_priority(first, second, &conflict.id)
            }
            ResolutionStrategy::Merge => {
                let (first, second) = load_pair(store, conflict).await?;
                vec![merge_rules(&first, &second)]
            }
            ResolutionStrategy::Override => {
                let (first, second) = load_pair(store, conflict).await?;
                if second.priority > first.priority {
                    vec![second]
                } else {
                    vec![first]
                }
            }
        };

        let resolution = ConflictResolution {
            id: format!("resolution-{}", conflict.id),
            conflict_id: conflict.id.clone(),
            strategy,
            resolved_rules,
            resolved_by: resolved_by.map(str::to_string),
            resolved_at: Utc::now(),
            notes: Some(format!("Conflict resolved using {} strategy", strategy)),
        };

        let entry = ActivityLogEntry::new(
            ActivityAction::ConflictResolved,
            EntityType::Conflict,
            conflict.id.clone(),
            resolution.resolved_by.clone(),
            json!({
                "conflictId": resolution.conflict_id,
                "strategy": strategy,
                "resolvedRules": resolution.resolved_rules.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            }),
        );
        store.create_activity_log_entry(entry).await?;

        info!(
            "Resolved conflict {} with {} strategy ({} rules)",
            conflict.id,
            strategy,
            resolution.resolved_rules.len()
        );
        Ok(resolution)
    }
}

async fn load_pair(store: &dyn RuleStore, conflict: &RuleConflict) -> Result<(Rule, Rule)> {
    let mut rules = store.find_rules_by_ids(&conflict.rule_ids).await?;
    for id in &conflict.rule_ids {
        if !rules.iter().any(|r| &r.id == id) {
            return Err(RuleEngineError::RuleNotFound(id.clone()));
        }
    }
    let second = rules.remove(1);
    let first = rules.remove(0);
    Ok((first, second))
}

fn resolve_by_priority(first: Rule, second: Rule, conflict_id: &str) -> Vec<Rule> {
    let (higher, mut lower) = if second.priority > first.priority {
        (second, first)
    } else {
        (first, second)
    };
    lower.exceptions.push(RuleException {
        rule_id: higher.id.clone(),
        rule_name: higher.name.clone(),
        priority: higher.priority,
        reason: format!("Yields to higher priority rule (conflict {})", conflict_id),
    });
    vec![higher, lower]
}

/// Combine two rules into one synthetic rule.
pub fn merge_rules(first: &Rule, second: &Rule) -> Rule {
    let mut merged = first.clone();
    merged.id = RuleId::from(format!("merged-{}-{}", first.id, second.id));
    merged.name = format!("{} + {}", first.name, second.name);
    merged.description = "Merged rule from conflict resolution".to_string();
    merged.version = 1;
    merged.conditions.extend(second.conditions.iter().cloned());
    merged.condition_groups.extend(second.condition_groups.iter().cloned());
    merged.actions = merge_actions(&first.actions, &second.actions);
    merged.priority = first.priority.max(second.priority);
    merged.tags.extend(second.tags.iter().cloned());
    merged.contexts.extend(second.contexts.iter().cloned());
    merged.exceptions.clear();
    merged.metrics = None;
    merged
}

fn merge_actions(first: &[Action], second: &[Action]) -> Vec<Action> {
    let mut merged: Vec<Action> = first.to_vec();
    for action in second {
        let existing = merged
            .iter_mut()
            .find(|a| a.action_type == action.action_type && a.target == action.target);
        match existing {
            None => merged.push(action.clone()),
            Some(existing) if action.action_type == ActionType::Modify => {
                existing.value = match (existing.value.take(), &action.value) {
                    (Some(old), Some(new)) => Some(combine_values(old, new)),
                    (old, new) => new.clone().or(old),
                };
            }
            Some(_) => {}
        }
    }
    merged
}

/// Numbers combine by max, arrays by union, anything else keeps `new`.
fn combine_values(old: Value, new: &Value) -> Value {
    match (&old, new) {
        (Value::Number(a), Value::Number(b)) => {
            if b.as_f64() > a.as_f64() {
                new.clone()
            } else {
                old
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut union = a.clone();
            for item in b {
                if !union.iter().any(|existing| values_equal(existing, item)) {
                    union.push(item.clone());
                }
            }
            Value::Array(union)
        }
        _ => new.clone(),
    }
}
