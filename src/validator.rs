// Rule validation before activation.
//
// Checks run in a fixed order:
// 1. Structure: required fields, length bounds, at least one condition/action
// 2. Business logic: contradictory conditions, inconsistent actions, and the
//    fields each rule type is expected to look at
// 3. Conditions: operator/value compatibility
// 4. Actions: per-type required fields, NOTIFY priority vocabulary
// 5. Validity window
//
// Problems are returned as data. Errors are keyed by field path and the
// first error recorded for a field wins; warnings never block.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::action_clause::{Action, ActionType, NOTIFY_PRIORITIES};
use crate::conflict::ConflictDetector;
use crate::config::ValidationLimits;
use crate::match_clause::{compare_values, values_equal, Condition, ConditionOperator};
use crate::rule_metadata::{Rule, RuleType};
use crate::template::RuleTemplate;

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    /// field path -> message
    pub errors: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::valid()
    }
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.is_valid = false;
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn merge(&mut self, other: ValidationReport) {
        for (field, message) in other.errors {
            self.add_error(field, message);
        }
        self.warnings.extend(other.warnings);
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// One-line rendering of the errors.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            return "no errors".to_string();
        }
        self.errors
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Structural and business-logic validation of candidate rules.
#[derive(Debug, Clone)]
pub struct RuleValidator {
    limits: ValidationLimits,
    detector: ConflictDetector,
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::with_limits(ValidationLimits::default())
    }

    pub fn with_limits(limits: ValidationLimits) -> Self {
        Self {
            limits,
            detector: ConflictDetector::new(),
        }
    }

    /// Validate a candidate rule. Never mutates it.
    pub fn validate_rule(&self, rule: &Rule) -> ValidationReport {
        let mut report = ValidationReport::valid();
        self.validate_structure(rule, &mut report);
        self.validate_business_logic(rule, &mut report);
        for (i, condition) in rule.conditions.iter().enumerate() {
            self.validate_condition(condition, &format!("conditions[{}]", i), &mut report);
        }
        for (g, group) in rule.condition_groups.iter().enumerate() {
            for (i, condition) in group.conditions.iter().enumerate() {
                let path = format!("conditionGroups[{}].conditions[{}]", g, i);
                self.validate_condition(condition, &path, &mut report);
            }
        }
        for (i, action) in rule.actions.iter().enumerate() {
            validate_action(action, &format!("actions[{}]", i), &mut report);
        }
        if let Some(expiration) = rule.expiration_date {
            if expiration <= rule.effective_date {
                report.add_error("expirationDate", "Expiration date must be after the effective date");
            }
        }
        self.add_warnings(rule, &mut report);
        report
    }

    /// Validate a raw JSON draft, reporting unknown enum spellings and
    /// missing fields per field before running [`Self::validate_rule`].
    pub fn validate_value(&self, draft: &Value) -> ValidationReport {
        let mut report = ValidationReport::valid();
        let object = match draft.as_object() {
            Some(object) => object,
            None => {
                report.add_error("rule", "Rule must be a JSON object");
                return report;
            }
        };

        for field in ["name", "type"] {
            if !object.contains_key(field) {
                report.add_error(field, format!("{} is required", field));
            }
        }
        check_spelling::<RuleType>(object.get("type"), "type", &mut report);
        check_spelling::<crate::rule_metadata::RuleStatus>(object.get("status"), "status", &mut report);
        if let Some(conditions) = object.get("conditions").and_then(Value::as_array) {
            for (i, condition) in conditions.iter().enumerate() {
                check_spelling::<ConditionOperator>(
                    condition.get("operator"),
                    &format!("conditions[{}].operator", i),
                    &mut report,
                );
            }
        }
        if let Some(actions) = object.get("actions").and_then(Value::as_array) {
            for (i, action) in actions.iter().enumerate() {
                check_spelling::<ActionType>(action.get("type"), &format!("actions[{}].type", i), &mut report);
            }
        }
        if !report.is_valid {
            return report;
        }

        let mut filled = object.clone();
        filled
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        filled.entry("status").or_insert_with(|| Value::String("draft".to_string()));
        filled
            .entry("effectiveDate")
            .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
        for author in ["createdBy", "updatedBy"] {
            filled.entry(author).or_insert_with(|| Value::String("draft".to_string()));
        }

        match serde_json::from_value::<Rule>(Value::Object(filled)) {
            Ok(rule) => report.merge(self.validate_rule(&rule)),
            Err(e) => report.add_error("rule", format!("Malformed rule: {}", e)),
        }
        report
    }

    /// [`Self::validate_rule`] plus conflict and redundancy warnings against
    /// the rules already in place.
    pub fn validate_against_existing(&self, rule: &Rule, existing: &[Rule]) -> ValidationReport {
        let mut report = self.validate_rule(rule);
        for conflict in self.detector.detect_conflicts(rule, existing) {
            report.add_warning(format!("Potential conflict: {}", conflict.description));
        }
        for redundant in find_redundant(rule, existing) {
            report.add_warning(format!(
                "This rule may make rule \"{}\" ({}) redundant",
                redundant.name, redundant.id
            ));
        }
        report
    }

    /// Every declared parameter must appear as `{name}` in the base rule and
    /// every example must supply all required parameters.
    pub fn validate_template(&self, template: &RuleTemplate) -> ValidationReport {
        let mut report = ValidationReport::valid();
        let serialized = template.base_rule.to_string();
        for parameter in &template.parameters {
            if !serialized.contains(&RuleTemplate::placeholder(&parameter.name)) {
                report.add_error(
                    format!("parameters.{}", parameter.name),
                    format!("Parameter '{}' is not referenced in the base rule", parameter.name),
                );
            }
        }
        for (i, example) in template.examples.iter().enumerate() {
            for parameter in template.parameters.iter().filter(|p| p.required) {
                if !example.parameters.contains_key(&parameter.name) {
                    report.add_error(
                        format!("examples[{}].{}", i, parameter.name),
                        format!(
                            "Example '{}' is missing required parameter '{}'",
                            example.name, parameter.name
                        ),
                    );
                }
            }
        }
        report
    }

    // ========================================================================
    // Checks
    // ========================================================================

    fn validate_structure(&self, rule: &Rule, report: &mut ValidationReport) {
        if rule.id.as_str().trim().is_empty() {
            report.add_error("id", "Rule id is required");
        }

        let name_len = rule.name.trim().chars().count();
        if name_len == 0 {
            report.add_error("name", "Name is required");
        } else if name_len < self.limits.name_min_len {
            report.add_error(
                "name",
                format!("Name must be at least {} characters", self.limits.name_min_len),
            );
        } else if name_len > self.limits.name_max_len {
            report.add_error(
                "name",
                format!("Name must be at most {} characters", self.limits.name_max_len),
            );
        }

        if rule.description.chars().count() > self.limits.description_max_len {
            report.add_error(
                "description",
                format!("Description must be at most {} characters", self.limits.description_max_len),
            );
        }
        if rule.version == 0 {
            report.add_error("version", "Version starts at 1");
        }
        if rule.created_by.trim().is_empty() {
            report.add_error("createdBy", "Author is required");
        }
        if !rule.has_conditions() {
            report.add_error("conditions", "At least one condition is required");
        }
        if rule.actions.is_empty() {
            report.add_error("actions", "At least one action is required");
        }
    }

    fn validate_business_logic(&self, rule: &Rule, report: &mut ValidationReport) {
        for (i, c1) in rule.conditions.iter().enumerate() {
            let contradicted = rule.conditions[i + 1..].iter().any(|c2| {
                c1.field == c2.field
                    && c1.operator == ConditionOperator::Equals
                    && c2.operator == ConditionOperator::Equals
                    && !values_equal(
                        c1.value.as_ref().unwrap_or(&Value::Null),
                        c2.value.as_ref().unwrap_or(&Value::Null),
                    )
            });
            if contradicted {
                report.add_error(
                    "conditions",
                    format!("Contradictory EQUALS conditions on field '{}'", c1.field),
                );
            }
        }

        for allow in rule.actions.iter().filter(|a| a.action_type == ActionType::Allow) {
            let inconsistent = rule
                .actions
                .iter()
                .any(|a| a.action_type == ActionType::Prevent && a.target == allow.target);
            if inconsistent {
                report.add_error(
                    "actions",
                    format!(
                        "Inconsistent ALLOW and PREVENT actions on target '{}'",
                        allow.target.as_deref().unwrap_or_default()
                    ),
                );
            }
        }

        let expected: Option<(&[&str], &str)> = match rule.rule_type {
            RuleType::Planning => Some((&["date", "time", "period"], "a date, time or period")),
            RuleType::Leave => Some((&["leave", "quota"], "a leave or quota")),
            RuleType::Supervision => Some((&["role", "senior", "experience"], "a role, seniority or experience")),
            RuleType::Constraint | RuleType::Allocation => None,
        };
        if let Some((keywords, label)) = expected {
            let mentions = rule.all_conditions().any(|c| {
                let field = c.field.to_ascii_lowercase();
                keywords.iter().any(|k| field.contains(k))
            });
            if rule.has_conditions() && !mentions {
                report.add_error(
                    "conditions",
                    format!("{} rules must include {} condition", rule.rule_type, label),
                );
            }
        }
    }

    fn validate_condition(&self, condition: &Condition, path: &str, report: &mut ValidationReport) {
        if !is_field_path(&condition.field) {
            report.add_error(
                format!("{}.field", path),
                format!("Invalid field path '{}'", condition.field),
            );
        }

        let value_path = format!("{}.value", path);
        let operator = condition.operator;
        let value = condition.value.as_ref().filter(|v| !v.is_null());

        match operator {
            ConditionOperator::IsNull | ConditionOperator::IsNotNull => {
                if value.is_some() {
                    report.add_error(value_path, format!("{} takes no value", operator));
                }
            }
            ConditionOperator::Custom => {
                let named = condition
                    .custom_function
                    .as_deref()
                    .map_or(false, |f| !f.trim().is_empty());
                if !named {
                    report.add_error(format!("{}.customFunction", path), "CUSTOM requires a function name");
                }
            }
            ConditionOperator::Between => match value.and_then(Value::as_array).map(Vec::as_slice) {
                Some([min, max]) => {
                    if compare_values(min, max).map_or(false, |o| o.is_gt()) {
                        report.add_error(value_path, "BETWEEN lower bound must not exceed upper bound");
                    }
                }
                _ => report.add_error(value_path, "BETWEEN requires a [min, max] pair"),
            },
            ConditionOperator::In | ConditionOperator::NotIn => {
                if value.and_then(Value::as_array).is_none() {
                    report.add_error(value_path, format!("{} requires an array of values", operator));
                }
            }
            ConditionOperator::Regex => match value.and_then(Value::as_str) {
                Some(pattern) => {
                    if let Err(e) = Regex::new(pattern) {
                        report.add_error(value_path, format!("Invalid regular expression: {}", e));
                    }
                }
                None => report.add_error(value_path, "REGEX requires a string pattern"),
            },
            _ => {
                if value.is_none() {
                    report.add_error(value_path, format!("{} requires a value", operator));
                }
            }
        }
    }

    fn add_warnings(&self, rule: &Rule, report: &mut ValidationReport) {
        if rule.priority >= self.limits.high_priority_warning {
            report.add_warning(format!(
                "Priority {} is very high; this rule will override most others",
                rule.priority
            ));
        }
        let condition_count = rule.condition_count();
        if condition_count > self.limits.max_conditions_warning {
            report.add_warning(format!(
                "Rule has {} conditions; consider splitting it",
                condition_count
            ));
        }
        let notify_count = rule
            .actions
            .iter()
            .filter(|a| a.action_type == ActionType::Notify)
            .count();
        if notify_count > self.limits.max_notify_actions_warning {
            report.add_warning(format!(
                "Rule sends {} notifications; planners may be flooded",
                notify_count
            ));
        }
        let has_custom = rule.all_conditions().any(|c| c.operator == ConditionOperator::Custom)
            || rule.has_action(ActionType::Custom);
        if has_custom {
            report.add_warning("Rule uses custom functions and requires manual review");
        }
    }
}

fn validate_action(action: &Action, path: &str, report: &mut ValidationReport) {
    let has_target = action.target.as_deref().map_or(false, |t| !t.trim().is_empty());
    let has_message = action.message.as_deref().map_or(false, |m| !m.trim().is_empty());
    let kind = action.action_type;

    match kind {
        ActionType::Prevent | ActionType::Allow | ActionType::Notify => {
            if !has_target {
                report.add_error(format!("{}.target", path), format!("{} requires a target", kind));
            }
            if !has_message {
                report.add_error(format!("{}.message", path), format!("{} requires a message", kind));
            }
        }
        ActionType::Modify => {
            if !has_target {
                report.add_error(format!("{}.target", path), "MODIFY requires a target");
            }
            if action.value.is_none() {
                report.add_error(format!("{}.value", path), "MODIFY requires a value");
            }
        }
        ActionType::Custom => {
            let named = action
                .custom_function
                .as_deref()
                .map_or(false, |f| !f.trim().is_empty());
            if !named {
                report.add_error(format!("{}.customFunction", path), "CUSTOM requires a function name");
            }
        }
        ActionType::Log | ActionType::Suggest | ActionType::Escalate => {}
    }

    if kind == ActionType::Notify {
        if let Some(priority) = action.metadata.get("priority") {
            let known = priority.as_str().map_or(false, |p| NOTIFY_PRIORITIES.contains(&p));
            if !known {
                report.add_error(
                    format!("{}.metadata.priority", path),
                    format!("Notification priority must be one of {}", NOTIFY_PRIORITIES.join(", ")),
                );
            }
        }
    }
}

/// Dot-separated identifiers: `user.role`, `planning.guard_count`.
fn is_field_path(path: &str) -> bool {
    path.split('.').all(|segment| {
        let mut chars = segment.chars();
        chars
            .next()
            .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

/// Record an error when `value` is present but not a known spelling of `T`.
fn check_spelling<T: serde::de::DeserializeOwned>(value: Option<&Value>, field: &str, report: &mut ValidationReport) {
    if let Some(value) = value {
        if serde_json::from_value::<T>(value.clone()).is_err() {
            report.add_error(field, format!("Unknown value {} for {}", value, field));
        }
    }
}

/// Same-type rules of lower or equal priority that `rule` already covers:
/// every field `rule` tests is also tested by the other rule and they share
/// an action type.
fn find_redundant<'a>(rule: &Rule, existing: &'a [Rule]) -> Vec<&'a Rule> {
    let fields: BTreeSet<&str> = rule.all_conditions().map(|c| c.field.as_str()).collect();
    let action_types: BTreeSet<ActionType> = rule.actions.iter().map(|a| a.action_type).collect();
    if fields.is_empty() {
        return Vec::new();
    }

    existing
        .iter()
        .filter(|other| other.id != rule.id)
        .filter(|other| other.rule_type == rule.rule_type && other.priority <= rule.priority)
        .filter(|other| {
            let other_fields: BTreeSet<&str> = other.all_conditions().map(|c| c.field.as_str()).collect();
            fields.is_subset(&other_fields)
        })
        .filter(|other| other.actions.iter().any(|a| action_types.contains(&a.action_type)))
        .collect()
}
