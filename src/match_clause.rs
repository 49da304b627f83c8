// This module implements the condition half of a rule: the predicates that
// decide whether a rule applies to a given staffing-planning context.
//
// 1. Condition: one operator applied to the value found at a dotted field path
// 2. ConditionGroup: AND / OR / NOT combination of conditions
// 3. CustomFunctionRegistry: named, pre-registered predicates for CUSTOM
//
// Evaluation is a pure read over the context. A missing path is "undefined",
// which is distinct from an explicit JSON null.

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::ConditionError;

// ============================================================================
// OPERATORS
// ============================================================================

/// Closed set of comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEquals,
    LessThanOrEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    /// Inclusive on both ends, value is `[min, max]`
    Between,
    IsNull,
    IsNotNull,
    Regex,
    Custom,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Equals => "EQUALS",
            ConditionOperator::NotEquals => "NOT_EQUALS",
            ConditionOperator::GreaterThan => "GREATER_THAN",
            ConditionOperator::LessThan => "LESS_THAN",
            ConditionOperator::GreaterThanOrEquals => "GREATER_THAN_OR_EQUALS",
            ConditionOperator::LessThanOrEquals => "LESS_THAN_OR_EQUALS",
            ConditionOperator::Contains => "CONTAINS",
            ConditionOperator::NotContains => "NOT_CONTAINS",
            ConditionOperator::In => "IN",
            ConditionOperator::NotIn => "NOT_IN",
            ConditionOperator::Between => "BETWEEN",
            ConditionOperator::IsNull => "IS_NULL",
            ConditionOperator::IsNotNull => "IS_NOT_NULL",
            ConditionOperator::Regex => "REGEX",
            ConditionOperator::Custom => "CUSTOM",
        }
    }

    /// Null checks take no operand.
    pub fn is_unary(&self) -> bool {
        matches!(self, ConditionOperator::IsNull | ConditionOperator::IsNotNull)
    }
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combinator for a condition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

impl std::fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
            LogicalOperator::Not => "NOT",
        };
        f.write_str(s)
    }
}

// ============================================================================
// EVALUATION CONTEXT
// ============================================================================

/// Why the caller is evaluating. Violation alerts are only sent for
/// `Validation` evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPurpose {
    #[default]
    Validation,
    Advisory,
    Simulation,
}

/// The document rules are evaluated against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    /// Planning/leave/user data, addressed by dotted paths
    pub data: Value,
    #[serde(default)]
    pub purpose: EvaluationPurpose,
    /// Optional scope; rules with a non-empty `contexts` set only apply when
    /// this is one of them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Date used for the rule validity window check
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            purpose: EvaluationPurpose::default(),
            scope: None,
            evaluated_at: Utc::now(),
        }
    }

    pub fn with_purpose(mut self, purpose: EvaluationPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.evaluated_at = at;
        self
    }

    /// Walk a dotted path through the context. Numeric segments index into
    /// arrays. `None` means undefined.
    pub fn get_field_value(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.data, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Stable digest of everything that can influence a result. Used as part
    /// of the result cache key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.data.to_string().as_bytes());
        hasher.update(format!("{:?}", self.purpose).as_bytes());
        if let Some(scope) = &self.scope {
            hasher.update(scope.as_bytes());
        }
        hasher.update(self.evaluated_at.date_naive().to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// CUSTOM FUNCTIONS
// ============================================================================

/// A registered predicate: `(context data, condition value) -> bool`.
pub type CustomFunction = Arc<dyn Fn(&Value, Option<&Value>) -> Result<bool, String> + Send + Sync>;

/// Audited table of custom predicates, looked up by name.
///
/// Custom logic is never compiled from source at runtime; it must be
/// registered here by the host process. Errors and panics inside a function
/// evaluate to `false`.
#[derive(Clone, Default)]
pub struct CustomFunctionRegistry {
    functions: Arc<RwLock<HashMap<String, CustomFunction>>>,
}

impl CustomFunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(&Value, Option<&Value>) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.functions.write().insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a registered function. Unknown names, `Err` results and panics
    /// all yield `false`.
    pub fn invoke(&self, name: &str, data: &Value, value: Option<&Value>) -> bool {
        let function = match self.functions.read().get(name) {
            Some(f) => Arc::clone(f),
            None => {
                warn!("Unknown custom function '{}'", name);
                return false;
            }
        };

        match panic::catch_unwind(AssertUnwindSafe(|| function(data, value))) {
            Ok(Ok(result)) => result,
            Ok(Err(reason)) => {
                warn!("Custom function '{}' failed: {}", name, reason);
                false
            }
            Err(_) => {
                warn!("Custom function '{}' panicked", name);
                false
            }
        }
    }
}

impl std::fmt::Debug for CustomFunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomFunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

// ============================================================================
// CONDITION
// ============================================================================

/// One predicate over a dotted field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_function: Option<String>,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            custom_function: None,
        }
    }

    /// Condition without an operand (IS_NULL / IS_NOT_NULL).
    pub fn unary(field: impl Into<String>, operator: ConditionOperator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
            custom_function: None,
        }
    }

    pub fn custom(field: impl Into<String>, function: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            field: field.into(),
            operator: ConditionOperator::Custom,
            value,
            custom_function: Some(function.into()),
        }
    }

    /// Human-readable form used in violation messages.
    pub fn describe(&self) -> String {
        match (&self.value, &self.custom_function) {
            (_, Some(function)) if self.operator == ConditionOperator::Custom => {
                format!("{} {}({})", self.field, self.operator, function)
            }
            (Some(value), _) => format!("{} {} {}", self.field, self.operator, value),
            (None, _) => format!("{} {}", self.field, self.operator),
        }
    }

    /// Test this condition against the context.
    pub fn evaluate(
        &self,
        context: &EvaluationContext,
        functions: &CustomFunctionRegistry,
    ) -> Result<bool, ConditionError> {
        let actual = match context.get_field_value(&self.field) {
            Some(v) => v,
            None => {
                return Ok(matches!(
                    self.operator,
                    ConditionOperator::IsNull | ConditionOperator::NotEquals
                ))
            }
        };
        let expected = self.value.as_ref().unwrap_or(&Value::Null);

        let result = match self.operator {
            ConditionOperator::Equals => values_equal(actual, expected),
            ConditionOperator::NotEquals => !values_equal(actual, expected),
            ConditionOperator::GreaterThan => compare_values(actual, expected) == Some(Ordering::Greater),
            ConditionOperator::LessThan => compare_values(actual, expected) == Some(Ordering::Less),
            ConditionOperator::GreaterThanOrEquals => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::LessThanOrEquals => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::Contains => contains(actual, expected).unwrap_or(false),
            ConditionOperator::NotContains => contains(actual, expected).map_or(false, |found| !found),
            ConditionOperator::In => set_operand(self.operator, expected)?
                .iter()
                .any(|item| values_equal(actual, item)),
            ConditionOperator::NotIn => !set_operand(self.operator, expected)?
                .iter()
                .any(|item| values_equal(actual, item)),
            ConditionOperator::Between => {
                let (min, max) = range_operand(expected)?;
                let above = compare_values(actual, min);
                let below = compare_values(actual, max);
                matches!(above, Some(Ordering::Greater | Ordering::Equal))
                    && matches!(below, Some(Ordering::Less | Ordering::Equal))
            }
            ConditionOperator::IsNull => actual.is_null(),
            ConditionOperator::IsNotNull => !actual.is_null(),
            ConditionOperator::Regex => {
                let pattern = expected.as_str().ok_or_else(|| ConditionError::MalformedOperand {
                    operator: self.operator,
                    reason: "pattern must be a string".to_string(),
                })?;
                let regex = Regex::new(pattern).map_err(|e| ConditionError::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                regex.is_match(&stringify(actual))
            }
            ConditionOperator::Custom => match &self.custom_function {
                Some(name) => functions.invoke(name, &context.data, self.value.as_ref()),
                None => {
                    warn!("CUSTOM condition on '{}' has no function name", self.field);
                    false
                }
            },
        };
        Ok(result)
    }
}

/// Group of conditions combined with one logical operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConditionGroup {
    pub fn new(operator: LogicalOperator, conditions: Vec<Condition>) -> Self {
        Self { operator, conditions }
    }

    /// Empty groups are true. Evaluation stops at the first condition that
    /// decides the outcome, or the first error.
    pub fn evaluate(
        &self,
        context: &EvaluationContext,
        functions: &CustomFunctionRegistry,
    ) -> Result<bool, ConditionError> {
        if self.conditions.is_empty() {
            return Ok(true);
        }
        match self.operator {
            LogicalOperator::And => all_hold(&self.conditions, context, functions),
            LogicalOperator::Or => {
                for condition in &self.conditions {
                    if condition.evaluate(context, functions)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            LogicalOperator::Not => all_hold(&self.conditions, context, functions).map(|all| !all),
        }
    }

    pub fn describe(&self) -> String {
        let parts: Vec<String> = self.conditions.iter().map(Condition::describe).collect();
        format!("{}({})", self.operator, parts.join(", "))
    }
}

fn all_hold(
    conditions: &[Condition],
    context: &EvaluationContext,
    functions: &CustomFunctionRegistry,
) -> Result<bool, ConditionError> {
    for condition in conditions {
        if !condition.evaluate(context, functions)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// VALUE HELPERS
// ============================================================================

/// Equality with numbers compared by value (`2 == 2.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

/// Numbers order numerically, strings lexicographically, anything else is
/// incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// String form used by REGEX and substring CONTAINS.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::Array(items) => Some(items.iter().any(|item| values_equal(item, needle))),
        Value::String(s) => Some(s.contains(&stringify(needle))),
        _ => None,
    }
}

fn set_operand(operator: ConditionOperator, value: &Value) -> Result<&Vec<Value>, ConditionError> {
    value.as_array().ok_or_else(|| ConditionError::MalformedOperand {
        operator,
        reason: "value must be an array".to_string(),
    })
}

fn range_operand(value: &Value) -> Result<(&Value, &Value), ConditionError> {
    match value.as_array().map(Vec::as_slice) {
        Some([min, max]) => Ok((min, max)),
        _ => Err(ConditionError::MalformedOperand {
            operator: ConditionOperator::Between,
            reason: "value must be a [min, max] pair".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(data: Value) -> EvaluationContext {
        EvaluationContext::new(data)
    }

    fn eval(condition: &Condition, context: &EvaluationContext) -> bool {
        condition
            .evaluate(context, &CustomFunctionRegistry::new())
            .unwrap()
    }

    #[test]
    fn test_field_resolution_walks_dotted_paths() {
        let context = ctx(json!({"user": {"role": "IADE", "shifts": [{"hours": 12}]}}));
        assert_eq!(context.get_field_value("user.role"), Some(&json!("IADE")));
        assert_eq!(context.get_field_value("user.shifts.0.hours"), Some(&json!(12)));
        assert_eq!(context.get_field_value("user.missing.deep"), None);
        assert_eq!(context.get_field_value("user.role.length"), None);
    }

    #[test]
    fn test_between_is_inclusive_on_both_ends() {
        let condition = Condition::new("planning.hours", ConditionOperator::Between, json!([10, 20]));
        for (hours, expected) in [(9, false), (10, true), (15, true), (20, true), (21, false)] {
            let context = ctx(json!({"planning": {"hours": hours}}));
            assert_eq!(eval(&condition, &context), expected, "hours = {}", hours);
        }
    }

    #[test]
    fn test_between_handles_fractional_bounds() {
        let condition = Condition::new("x", ConditionOperator::Between, json!([1.5, 2.5]));
        assert!(eval(&condition, &ctx(json!({"x": 1.5}))));
        assert!(eval(&condition, &ctx(json!({"x": 2.5}))));
        assert!(!eval(&condition, &ctx(json!({"x": 2.51}))));
    }

    #[test]
    fn test_undefined_only_matches_is_null_and_not_equals() {
        let context = ctx(json!({"user": {}}));
        let operators = [
            (ConditionOperator::Equals, false),
            (ConditionOperator::NotEquals, true),
            (ConditionOperator::GreaterThan, false),
            (ConditionOperator::LessThanOrEquals, false),
            (ConditionOperator::Contains, false),
            (ConditionOperator::NotContains, false),
            (ConditionOperator::NotIn, false),
            (ConditionOperator::IsNotNull, false),
        ];
        for (operator, expected) in operators {
            let condition = Condition::new("user.role", operator, json!(["x"]));
            assert_eq!(eval(&condition, &context), expected, "{}", operator);
        }
        let is_null = Condition::unary("user.role", ConditionOperator::IsNull);
        assert!(eval(&is_null, &context));
    }

    #[test]
    fn test_explicit_null_is_a_value() {
        let context = ctx(json!({"user": {"manager": null}}));
        assert!(eval(&Condition::unary("user.manager", ConditionOperator::IsNull), &context));
        assert!(!eval(&Condition::unary("user.manager", ConditionOperator::IsNotNull), &context));
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        let condition = Condition::new("n", ConditionOperator::Equals, json!(2.0));
        assert!(eval(&condition, &ctx(json!({"n": 2}))));
    }

    #[test]
    fn test_ordering_compares_iso_dates_as_strings() {
        let condition = Condition::new("leave.start", ConditionOperator::LessThan, "2026-03-01");
        assert!(eval(&condition, &ctx(json!({"leave": {"start": "2026-02-14"}}))));
        assert!(!eval(&condition, &ctx(json!({"leave": {"start": 5}}))));
    }

    #[test]
    fn test_contains_on_arrays_and_strings() {
        let condition = Condition::new("user.skills", ConditionOperator::Contains, "pediatric");
        assert!(eval(&condition, &ctx(json!({"user": {"skills": ["cardiac", "pediatric"]}}))));
        assert!(eval(&condition, &ctx(json!({"user": {"skills": "pediatric-anesthesia"}}))));
        let not = Condition::new("user.skills", ConditionOperator::NotContains, "pediatric");
        assert!(not.evaluate(&ctx(json!({"user": {"skills": []}})), &CustomFunctionRegistry::new()).unwrap());
    }

    #[test]
    fn test_in_and_not_in() {
        let context = ctx(json!({"user": {"role": "MAR"}}));
        assert!(eval(&Condition::new("user.role", ConditionOperator::In, json!(["IADE", "MAR"])), &context));
        assert!(eval(&Condition::new("user.role", ConditionOperator::NotIn, json!(["IADE"])), &context));
    }

    #[test]
    fn test_malformed_operands_raise_errors() {
        let context = ctx(json!({"x": 3}));
        let registry = CustomFunctionRegistry::new();
        let between = Condition::new("x", ConditionOperator::Between, json!([1]));
        assert!(matches!(
            between.evaluate(&context, &registry),
            Err(ConditionError::MalformedOperand { .. })
        ));
        let in_scalar = Condition::new("x", ConditionOperator::In, 3);
        assert!(in_scalar.evaluate(&context, &registry).is_err());
        let regex = Condition::new("x", ConditionOperator::Regex, "([0-9");
        assert!(matches!(
            regex.evaluate(&context, &registry),
            Err(ConditionError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_regex_tests_stringified_field() {
        let condition = Condition::new("user.code", ConditionOperator::Regex, "^[A-Z]{3}-\\d+$");
        assert!(eval(&condition, &ctx(json!({"user": {"code": "MAR-42"}}))));
        let numeric = Condition::new("n", ConditionOperator::Regex, "^4\\d$");
        assert!(eval(&numeric, &ctx(json!({"n": 42}))));
    }

    #[test]
    fn test_custom_functions_never_propagate_failures() {
        let registry = CustomFunctionRegistry::new();
        registry.register("is_senior", |data, _| {
            Ok(data["user"]["years"].as_u64().unwrap_or(0) >= 10)
        });
        registry.register("always_err", |_, _| Err("boom".to_string()));
        registry.register("panics", |_, _| panic!("custom function panic"));

        let context = ctx(json!({"user": {"years": 12}}));
        let ok = Condition::custom("user.years", "is_senior", None);
        assert!(ok.evaluate(&context, &registry).unwrap());
        for name in ["always_err", "panics", "not_registered"] {
            let condition = Condition::custom("user.years", name, None);
            assert!(!condition.evaluate(&context, &registry).unwrap(), "{}", name);
        }
    }

    #[test]
    fn test_group_semantics() {
        let context = ctx(json!({"a": 1, "b": 2}));
        let registry = CustomFunctionRegistry::new();
        let yes = Condition::new("a", ConditionOperator::Equals, 1);
        let no = Condition::new("b", ConditionOperator::Equals, 3);

        let and = ConditionGroup::new(LogicalOperator::And, vec![yes.clone(), no.clone()]);
        let or = ConditionGroup::new(LogicalOperator::Or, vec![yes.clone(), no.clone()]);
        let not = ConditionGroup::new(LogicalOperator::Not, vec![yes, no]);
        let empty = ConditionGroup::new(LogicalOperator::Or, vec![]);

        assert!(!and.evaluate(&context, &registry).unwrap());
        assert!(or.evaluate(&context, &registry).unwrap());
        assert!(not.evaluate(&context, &registry).unwrap());
        assert!(empty.evaluate(&context, &registry).unwrap());
    }

    #[test]
    fn test_fingerprint_depends_on_data_and_scope() {
        let a = ctx(json!({"x": 1}));
        let b = ctx(json!({"x": 2}));
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), a.clone().with_scope("icu").fingerprint());
    }

    #[test]
    fn test_operator_wire_names() {
        let op: ConditionOperator = serde_json::from_str("\"GREATER_THAN_OR_EQUALS\"").unwrap();
        assert_eq!(op, ConditionOperator::GreaterThanOrEquals);
        assert_eq!(serde_json::to_string(&ConditionOperator::NotIn).unwrap(), "\"NOT_IN\"");
    }
}
